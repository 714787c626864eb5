use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("an identical medication already exists")]
    DuplicateMedication,

    #[error("{0} {1} not found")]
    NotFound(&'static str, Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
