use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use medtime_db::models::ReminderRow;
use medtime_engine::{Engine, EngineError};
use medtime_types::api::{Claims, MarkTakenRequest, ReminderResponse, SkipReminderRequest};

use crate::auth::{AppState, blocking};

pub fn reminder_response(reminder: ReminderRow) -> ReminderResponse {
    ReminderResponse {
        id: reminder.id,
        medication_id: reminder.medication_id,
        scheduled_for: reminder.scheduled_for,
        taken: reminder.taken,
        taken_at: reminder.taken_at,
        skipped: reminder.skipped,
        skipped_reason: reminder.skipped_reason,
        notified: reminder.notified,
    }
}

/// Reminders of other users look the same as missing ones.
fn ensure_owner(engine: &Engine, user_id: Uuid, reminder_id: Uuid) -> medtime_engine::Result<()> {
    match engine.db.reminder_owner(reminder_id)? {
        Some(owner) if owner == user_id => Ok(()),
        _ => Err(EngineError::NotFound("reminder", reminder_id)),
    }
}

/// PUT /reminders/{reminder_id}/taken
pub async fn mark_taken(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reminder_id): Path<Uuid>,
    Json(req): Json<MarkTakenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let engine = state.engine.clone();
    let user_id = claims.sub;

    let transition = blocking(move || {
        ensure_owner(&engine, user_id, reminder_id)?;
        engine.ledger.apply_taken_transition(reminder_id, req.taken)
    })
    .await?;

    Ok(Json(reminder_response(transition.reminder)))
}

/// POST /reminders/{reminder_id}/skip
pub async fn skip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reminder_id): Path<Uuid>,
    Json(req): Json<SkipReminderRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let engine = state.engine.clone();
    let user_id = claims.sub;

    let reminder = blocking(move || {
        ensure_owner(&engine, user_id, reminder_id)?;
        engine.ledger.skip_reminder(reminder_id, &req.reason)
    })
    .await?;

    Ok(Json(reminder_response(reminder)))
}
