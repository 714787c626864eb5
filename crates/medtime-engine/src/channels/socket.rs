use async_trait::async_trait;
use uuid::Uuid;

use medtime_db::models::UserRow;
use medtime_gateway::ConnectionRegistry;
use medtime_types::models::ChannelKind;

use super::{ChannelError, ChannelSender, Delivery};
use crate::notification::Notification;

/// Pushes reminders to the user's open gateway connection, if any.
pub struct SocketSender {
    registry: ConnectionRegistry,
}

impl SocketSender {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChannelSender for SocketSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    fn address(&self, user: &UserRow) -> Option<String> {
        user.socket_enabled.then(|| user.id.to_string())
    }

    async fn send(&self, address: &str, notification: &Notification) -> Result<Delivery, ChannelError> {
        let user_id: Uuid = address
            .parse()
            .map_err(|_| ChannelError::InvalidAddress(address.to_string()))?;

        let Some(event) = notification.to_gateway_event() else {
            return Ok(Delivery::Unsupported);
        };

        if self.registry.send_to_user(user_id, event).await {
            Ok(Delivery::Delivered)
        } else {
            Ok(Delivery::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use medtime_types::events::GatewayEvent;

    fn reminder() -> Notification {
        Notification::MedicationReminder {
            reminder_id: Uuid::new_v4(),
            medication_id: Uuid::new_v4(),
            medication_name: "Aspirin".into(),
            title: "Aspirin: time for your medication".into(),
            body: "Dose: 1 tablets".into(),
            scheduled_for: NaiveDateTime::parse_from_str("2024-05-01 20:00", "%Y-%m-%d %H:%M")
                .unwrap(),
            low_stock: false,
        }
    }

    #[tokio::test]
    async fn offline_user_is_not_an_error() {
        let sender = SocketSender::new(ConnectionRegistry::new());
        let user = Uuid::new_v4().to_string();

        let result = sender.send(&user, &reminder()).await.unwrap();
        assert_eq!(result, Delivery::NotConnected);
    }

    #[tokio::test]
    async fn connected_user_receives_typed_event() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (_, mut rx) = registry.register(user_id).await;
        let sender = SocketSender::new(registry);

        let result = sender.send(&user_id.to_string(), &reminder()).await.unwrap();

        assert_eq!(result, Delivery::Delivered);
        assert!(matches!(
            rx.recv().await,
            Some(GatewayEvent::MedicationReminder { .. })
        ));
    }
}
