//! Delivery channels. Each provider sits behind [`ChannelSender`] so the
//! dispatcher can fan a notification out without knowing who is on the other end.

pub mod push;
pub mod socket;
pub mod telegram;
pub mod whatsapp;

use async_trait::async_trait;
use thiserror::Error;

use medtime_db::models::UserRow;
use medtime_types::models::ChannelKind;

use crate::notification::Notification;

pub use push::PushSender;
pub use socket::SocketSender;
pub use telegram::TelegramSender;
pub use whatsapp::WhatsAppSender;

/// Label on the inline "mark as taken" button of chat messages.
pub(crate) const TAKEN_BUTTON_LABEL: &str = "✅ Taken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Recipient has no live connection; nothing was sent.
    NotConnected,
    /// This channel does not carry this kind of notification.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("recipient token is no longer valid")]
    InvalidToken,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("provider rejected request ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Where this channel would reach `user`, or `None` if it is not set up.
    fn address(&self, user: &UserRow) -> Option<String>;

    async fn send(
        &self,
        address: &str,
        notification: &Notification,
    ) -> Result<Delivery, ChannelError>;
}

/// Turn a non-success provider response into a [`ChannelError::Provider`].
pub(crate) async fn provider_error(response: reqwest::Response) -> ChannelError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ChannelError::Provider {
        status,
        message: truncate(&message, 500),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
