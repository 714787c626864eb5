//! HTTP entry points into the reminder engine.

pub mod auth;
pub mod middleware;
pub mod notifications;
pub mod reminders;
pub mod webhooks;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

pub fn router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/webhooks/telegram", post(webhooks::telegram))
        .route(
            "/webhooks/whatsapp",
            get(webhooks::whatsapp_verify).post(webhooks::whatsapp),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/reminders/{reminder_id}/taken", put(reminders::mark_taken))
        .route("/reminders/{reminder_id}/skip", post(reminders::skip))
        .route("/notifications/sync", get(notifications::sync))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(webhook_routes).merge(protected_routes)
}
