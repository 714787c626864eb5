//! Realtime WebSocket gateway: one live connection per user, used by the
//! socket notification channel to push reminders to open clients.

pub mod connection;
pub mod registry;

pub use registry::ConnectionRegistry;
