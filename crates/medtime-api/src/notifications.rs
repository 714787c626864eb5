use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use medtime_types::api::Claims;

use crate::auth::{AppState, blocking};

/// GET /notifications/sync
///
/// Polled by desktop clients in place of a live socket.
pub async fn sync(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let engine = state.engine.clone();
    let reminders = blocking(move || engine.sync.pending_for(claims.sub)).await?;
    Ok(Json(reminders))
}
