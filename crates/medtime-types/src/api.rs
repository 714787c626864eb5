use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Unit;

// -- JWT Claims --

/// JWT claims shared across medtime-api (REST middleware) and medtime-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Reminders --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkTakenRequest {
    pub taken: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipReminderRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_for: NaiveDateTime,
    pub taken: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub skipped_reason: Option<String>,
    pub notified: bool,
}

// -- Desktop sync --

#[derive(Debug, Clone, Serialize)]
pub struct SyncedMedication {
    pub id: Uuid,
    pub name: String,
    pub dosage_quantity: f64,
    pub unit: Unit,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncedReminder {
    pub id: Uuid,
    pub scheduled_for: NaiveDateTime,
    pub medication: SyncedMedication,
}

// -- Telegram webhook (subset of the Bot API Update object) --

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

// -- WhatsApp webhook (subset of the Graph API notification payload) --

#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhook {
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppEntry {
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppChange {
    pub value: WhatsAppChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppChangeValue {
    #[serde(default)]
    pub messages: Vec<WhatsAppInbound>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppInbound {
    pub from: String,
    pub interactive: Option<WhatsAppInteractive>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppInteractive {
    pub button_reply: Option<WhatsAppButtonReply>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppButtonReply {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}
