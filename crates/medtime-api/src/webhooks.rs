use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, warn};

use medtime_engine::actions::parse_taken_action;
use medtime_engine::channels::whatsapp::normalize_phone;
use medtime_engine::{ActionOutcome, Notification};
use medtime_types::api::{TelegramUpdate, WhatsAppVerifyQuery, WhatsAppWebhook};
use medtime_types::models::ChannelKind;

use crate::auth::{AppState, blocking};

/// POST /webhooks/telegram
///
/// Always answers 200; Telegram redelivers anything else.
pub async fn telegram(State(state): State<AppState>, Json(update): Json<TelegramUpdate>) -> StatusCode {
    let Some(query) = update.callback_query else {
        return StatusCode::OK;
    };
    let Some(chat_id) = query.message.as_ref().map(|m| m.chat.id.to_string()) else {
        return StatusCode::OK;
    };
    let Some(reminder_id) = query.data.as_deref().and_then(parse_taken_action) else {
        debug!(%chat_id, "Ignoring unrelated callback query");
        return StatusCode::OK;
    };

    let engine = state.engine.clone();
    let chat = chat_id.clone();
    let result = blocking(move || {
        let Some(user) = engine.db.find_user_by_telegram_chat(&chat)? else {
            return Ok(None);
        };
        let outcome = engine.actions.on_channel_action_taken(user.id, reminder_id)?;
        let reply = engine.actions.confirmation(&outcome, user.timezone.as_deref());
        Ok(Some((outcome, reply)))
    })
    .await;

    let ack = match result {
        Ok(Some((outcome, reply))) => {
            if let Some(reply) = reply {
                confirm(&state, ChannelKind::Telegram, &chat_id, &reply).await;
            }
            callback_text(&outcome)
        }
        Ok(None) => {
            warn!(%chat_id, "Telegram action from unknown chat");
            "Reminder not found"
        }
        Err(status) => {
            warn!(%chat_id, %reminder_id, %status, "Telegram action failed");
            "Something went wrong, try again"
        }
    };

    if let Some(telegram) = &state.telegram {
        if let Err(e) = telegram.answer_callback(&query.id, ack).await {
            warn!(%chat_id, "Failed to answer callback query: {}", e);
        }
    }
    StatusCode::OK
}

/// GET /webhooks/whatsapp
///
/// Meta's subscription handshake: echo the challenge if the token matches.
pub async fn whatsapp_verify(
    State(state): State<AppState>,
    Query(query): Query<WhatsAppVerifyQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let expected = state.whatsapp_verify_token.as_deref().ok_or(StatusCode::FORBIDDEN)?;

    if query.mode.as_deref() != Some("subscribe") || query.verify_token.as_deref() != Some(expected) {
        warn!("WhatsApp webhook verification rejected");
        return Err(StatusCode::FORBIDDEN);
    }
    query.challenge.ok_or(StatusCode::BAD_REQUEST)
}

/// POST /webhooks/whatsapp
pub async fn whatsapp(State(state): State<AppState>, Json(hook): Json<WhatsAppWebhook>) -> StatusCode {
    let presses = hook
        .entry
        .into_iter()
        .flat_map(|entry| entry.changes)
        .flat_map(|change| change.value.messages)
        .filter_map(|message| {
            let id = message.interactive?.button_reply?.id;
            Some((message.from, parse_taken_action(&id)?))
        });

    for (from, reminder_id) in presses {
        let Some(digits) = normalize_phone(&from) else {
            continue;
        };

        let engine = state.engine.clone();
        let number = digits.clone();
        let result = blocking(move || {
            let user = match engine.db.find_user_by_whatsapp(&format!("+{}", number))? {
                Some(user) => Some(user),
                None => engine.db.find_user_by_whatsapp(&number)?,
            };
            let Some(user) = user else {
                return Ok(None);
            };
            let outcome = engine.actions.on_channel_action_taken(user.id, reminder_id)?;
            Ok(engine.actions.confirmation(&outcome, user.timezone.as_deref()))
        })
        .await;

        match result {
            Ok(Some(reply)) => confirm(&state, ChannelKind::WhatsApp, &digits, &reply).await,
            Ok(None) => debug!(%reminder_id, "WhatsApp action matched no reminder of the sender"),
            Err(status) => warn!(%reminder_id, %status, "WhatsApp action failed"),
        }
    }

    StatusCode::OK
}

async fn confirm(state: &AppState, kind: ChannelKind, address: &str, reply: &Notification) {
    if let Err(e) = state.engine.dispatcher.send_via(kind, address, reply).await {
        warn!(channel = %kind, "Failed to send confirmation: {}", e);
    }
}

fn callback_text(outcome: &ActionOutcome) -> &'static str {
    match outcome {
        ActionOutcome::Taken { .. } => "Marked as taken",
        ActionOutcome::AlreadyTaken { .. } => "Already marked as taken",
        ActionOutcome::NotFound => "Reminder not found",
    }
}
