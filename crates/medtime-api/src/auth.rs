use std::sync::Arc;

use axum::http::StatusCode;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::error;

use medtime_engine::channels::telegram::TelegramSender;
use medtime_engine::{Engine, EngineError};
use medtime_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    pub jwt_secret: String,
    /// Shared secret Meta echoes during webhook verification.
    pub whatsapp_verify_token: Option<String>,
    /// Needed to acknowledge callback queries, which only Telegram has.
    pub telegram: Option<Arc<TelegramSender>>,
}

pub fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

pub(crate) fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_) | EngineError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
        EngineError::DuplicateMedication => StatusCode::CONFLICT,
        EngineError::NotFound(..) => StatusCode::NOT_FOUND,
        EngineError::Store(err) => {
            error!("Store error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Run store-bound engine work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> medtime_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| engine_status(&e))
}
