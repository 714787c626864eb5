use async_trait::async_trait;
use serde_json::{Value, json};

use medtime_db::models::UserRow;
use medtime_types::models::ChannelKind;

use super::{ChannelError, ChannelSender, Delivery, TAKEN_BUTTON_LABEL, provider_error};
use crate::notification::Notification;

const TELEGRAM_BASE_URL: &str = "https://api.telegram.org";

/// Prefix of the inline keyboard callback data; the reminder id follows it.
pub const TAKEN_ACTION_PREFIX: &str = "taken:";

/// Telegram Bot API sender.
pub struct TelegramSender {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl TelegramSender {
    pub fn new(client: reqwest::Client, token: String) -> Self {
        Self {
            client,
            token,
            base_url: TELEGRAM_BASE_URL.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Acknowledge a button press so the client stops its loading spinner.
    pub async fn answer_callback(&self, callback_query_id: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.method_url("answerCallbackQuery"))
            .json(&json!({ "callback_query_id": callback_query_id, "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn address(&self, user: &UserRow) -> Option<String> {
        if !user.telegram_enabled {
            return None;
        }
        user.telegram_chat_id.clone().filter(|id| !id.trim().is_empty())
    }

    async fn send(&self, address: &str, notification: &Notification) -> Result<Delivery, ChannelError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&message_body(address, notification))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        Ok(Delivery::Delivered)
    }
}

pub fn message_body(chat_id: &str, notification: &Notification) -> Value {
    let text = format!(
        "<b>{}</b>\n\n{}",
        escape_html(&notification.title()),
        escape_html(&notification.body())
    );

    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
    });

    if notification.wants_taken_action() {
        body["reply_markup"] = json!({
            "inline_keyboard": [[{
                "text": TAKEN_BUTTON_LABEL,
                "callback_data": format!("{}{}", TAKEN_ACTION_PREFIX, notification.reminder_id()),
            }]]
        });
    }

    body
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
