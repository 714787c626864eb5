use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use medtime_db::models::UserRow;
use medtime_types::models::ChannelKind;

use super::{ChannelError, ChannelSender, Delivery, truncate};
use crate::notification::Notification;

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

/// Firebase Cloud Messaging (HTTP v1) sender.
pub struct PushSender {
    client: reqwest::Client,
    project_id: String,
    access_token: String,
    base_url: String,
}

impl PushSender {
    pub fn new(client: reqwest::Client, project_id: String, access_token: String) -> Self {
        Self {
            client,
            project_id,
            access_token,
            base_url: FCM_BASE_URL.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/projects/{}/messages:send", self.base_url, self.project_id)
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    fn address(&self, user: &UserRow) -> Option<String> {
        user.push_token.clone().filter(|t| !t.is_empty())
    }

    async fn send(&self, address: &str, notification: &Notification) -> Result<Delivery, ChannelError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.access_token)
            .json(&message_body(address, notification))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(reminder_id = %notification.reminder_id(), "Push delivered");
            return Ok(Delivery::Delivered);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

/// FCM v1 `messages:send` request body.
pub fn message_body(token: &str, notification: &Notification) -> Value {
    let mut data = json!({
        "reminderId": notification.reminder_id().to_string(),
    });

    let (kind, url) = match notification {
        Notification::MedicationReminder {
            medication_id,
            scheduled_for,
            ..
        } => {
            data["medicationId"] = json!(medication_id.to_string());
            data["scheduledFor"] = json!(scheduled_for.format("%Y-%m-%dT%H:%M:%S").to_string());
            ("medication_reminder", format!("/medications/{}", medication_id))
        }
        Notification::DoseConfirmed { .. } => ("dose_confirmed", "/".to_string()),
        Notification::AlreadyTaken { .. } => ("already_taken", "/".to_string()),
    };
    data["type"] = json!(kind);
    data["url"] = json!(url);

    json!({
        "message": {
            "token": token,
            "notification": {
                "title": notification.title(),
                "body": notification.body(),
            },
            "data": data,
            "android": {
                "priority": "high",
                "notification": { "channel_id": "medication_reminders", "default_sound": true },
            },
            "apns": {
                "headers": { "apns-priority": "10" },
                "payload": { "aps": { "sound": "default", "content-available": 1 } },
            },
            "webpush": {
                "headers": { "Urgency": "high" },
                "fcm_options": { "link": url },
            },
        }
    })
}

/// Map an FCM error response. Unregistered or malformed tokens become
/// [`ChannelError::InvalidToken`] so the caller can forget them.
pub fn classify_failure(status: StatusCode, body: &str) -> ChannelError {
    let token_rejected = status == StatusCode::NOT_FOUND
        || body.contains("UNREGISTERED")
        || (body.contains("INVALID_ARGUMENT") && body.to_ascii_lowercase().contains("token"));

    if token_rejected {
        ChannelError::InvalidToken
    } else {
        ChannelError::Provider {
            status: status.as_u16(),
            message: truncate(body, 500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use uuid::Uuid;

    #[test]
    fn reminder_body_carries_routing_data() {
        let medication_id = Uuid::new_v4();
        let n = Notification::MedicationReminder {
            reminder_id: Uuid::nil(),
            medication_id,
            medication_name: "Aspirin".into(),
            title: "Aspirin: time for your medication".into(),
            body: "Dose: 1 tablets".into(),
            scheduled_for: NaiveDateTime::parse_from_str("2024-05-01 20:00", "%Y-%m-%d %H:%M")
                .unwrap(),
            low_stock: false,
        };

        let body = message_body("device-token", &n);
        let msg = &body["message"];
        assert_eq!(msg["token"], "device-token");
        assert_eq!(msg["notification"]["title"], "Aspirin: time for your medication");
        assert_eq!(msg["data"]["type"], "medication_reminder");
        assert_eq!(msg["data"]["scheduledFor"], "2024-05-01T20:00:00");
        assert_eq!(msg["data"]["url"], format!("/medications/{medication_id}"));
        assert_eq!(msg["android"]["priority"], "high");
    }

    #[test]
    fn unregistered_tokens_are_invalid() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, ""),
            ChannelError::InvalidToken
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"status":"INVALID_ARGUMENT","message":"The registration token is not a valid FCM registration token"}}"#
            ),
            ChannelError::InvalidToken
        ));
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            ChannelError::Provider { status: 503, .. }
        ));
    }
}
