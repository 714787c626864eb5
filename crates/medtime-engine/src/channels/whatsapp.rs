use async_trait::async_trait;
use serde_json::{Value, json};

use medtime_db::models::UserRow;
use medtime_types::models::ChannelKind;

use super::{ChannelError, ChannelSender, Delivery, TAKEN_BUTTON_LABEL, provider_error};
use crate::notification::Notification;

const GRAPH_BASE_URL: &str = "https://graph.facebook.com/v17.0";

/// Prefix of the interactive button id; the reminder id follows it.
pub const TAKEN_ACTION_PREFIX: &str = "medication_taken:";

/// WhatsApp Business Cloud API sender.
pub struct WhatsAppSender {
    client: reqwest::Client,
    phone_number_id: String,
    access_token: String,
    base_url: String,
}

impl WhatsAppSender {
    pub fn new(client: reqwest::Client, phone_number_id: String, access_token: String) -> Self {
        Self {
            client,
            phone_number_id,
            access_token,
            base_url: GRAPH_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn address(&self, user: &UserRow) -> Option<String> {
        if !user.whatsapp_enabled {
            return None;
        }
        user.whatsapp_number.as_deref().and_then(normalize_phone)
    }

    async fn send(&self, address: &str, notification: &Notification) -> Result<Delivery, ChannelError> {
        let to = normalize_phone(address)
            .ok_or_else(|| ChannelError::InvalidAddress(address.to_string()))?;

        let response = self
            .client
            .post(format!("{}/{}/messages", self.base_url, self.phone_number_id))
            .bearer_auth(&self.access_token)
            .json(&message_body(&to, notification))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        Ok(Delivery::Delivered)
    }
}

/// Keep digits only ("+55 (11) 91234-5678" -> "5511912345678").
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

pub fn message_body(to: &str, notification: &Notification) -> Value {
    let text = format!("*{}*\n\n{}", notification.title(), notification.body());

    if !notification.wants_taken_action() {
        return json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": text },
        });
    }

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "body": { "text": text },
            "action": {
                "buttons": [{
                    "type": "reply",
                    "reply": {
                        "id": format!("{}{}", TAKEN_ACTION_PREFIX, notification.reminder_id()),
                        "title": TAKEN_BUTTON_LABEL,
                    }
                }]
            }
        }
    })
}
