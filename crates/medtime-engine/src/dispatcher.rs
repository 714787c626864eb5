use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::{DueReminder, UserRow};
use medtime_types::models::ChannelKind;

use crate::channels::{ChannelError, ChannelSender, Delivery};
use crate::clock::Clock;
use crate::error::Result;
use crate::notification::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This call claimed the reminder and fanned it out.
    Dispatched,
    /// Another path already notified, took or skipped it; nothing was sent.
    AlreadyHandled,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub reminder_id: Uuid,
    pub outcome: DispatchOutcome,
    pub delivered: Vec<ChannelKind>,
    pub not_connected: Vec<ChannelKind>,
    pub failed: Vec<ChannelKind>,
}

impl DispatchReport {
    fn skipped(reminder_id: Uuid) -> Self {
        Self {
            reminder_id,
            outcome: DispatchOutcome::AlreadyHandled,
            delivered: Vec::new(),
            not_connected: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Claims due reminders and fans them out to every configured channel.
pub struct Dispatcher {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    senders: Vec<Arc<dyn ChannelSender>>,
    channel_timeout: Duration,
    low_stock_threshold: f64,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        senders: Vec<Arc<dyn ChannelSender>>,
        channel_timeout: Duration,
        low_stock_threshold: f64,
    ) -> Self {
        Self {
            db,
            clock,
            senders,
            channel_timeout,
            low_stock_threshold,
        }
    }

    pub fn sender(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelSender>> {
        self.senders.iter().find(|s| s.kind() == kind).cloned()
    }

    /// Claim and fan out one due reminder. A push token the provider rejects
    /// is removed from `user` as well as the store, so later dispatches in the
    /// same pass skip it.
    pub async fn dispatch(&self, due: &DueReminder, user: &mut UserRow) -> Result<DispatchReport> {
        let reminder_id = due.reminder.id;

        // Claim before sending: at most one delivery per reminder, even if the
        // user marks it as taken while we are fanning out.
        if !self.db.claim_for_notification(reminder_id, self.clock.now())? {
            debug!(%reminder_id, "Reminder already handled, not dispatching");
            return Ok(DispatchReport::skipped(reminder_id));
        }

        let notification =
            Notification::reminder(&due.reminder, &due.medication, self.low_stock_threshold);

        let targets: Vec<_> = self
            .senders
            .iter()
            .filter_map(|sender| sender.address(user).map(|addr| (sender.clone(), addr)))
            .collect();

        let results = join_all(targets.iter().map(|(sender, address)| {
            let notification = &notification;
            async move {
                let result = self.send_with_timeout(sender.as_ref(), address, notification).await;
                (sender.kind(), result)
            }
        }))
        .await;

        let mut report = DispatchReport {
            reminder_id,
            outcome: DispatchOutcome::Dispatched,
            delivered: Vec::new(),
            not_connected: Vec::new(),
            failed: Vec::new(),
        };

        for (kind, result) in results {
            match result {
                Ok(Delivery::Delivered) => report.delivered.push(kind),
                Ok(Delivery::NotConnected) | Ok(Delivery::Unsupported) => {
                    report.not_connected.push(kind)
                }
                Err(e) => {
                    warn!(%reminder_id, user_id = %user.id, channel = %kind, "Delivery failed: {}", e);
                    if matches!(e, ChannelError::InvalidToken) && kind == ChannelKind::Push {
                        self.forget_push_token(user.id);
                        user.push_token = None;
                    }
                    report.failed.push(kind);
                }
            }
        }

        info!(
            %reminder_id,
            user_id = %user.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Reminder dispatched"
        );
        Ok(report)
    }

    /// Send one notification over one channel, bounded by the channel timeout.
    pub async fn send_via(
        &self,
        kind: ChannelKind,
        address: &str,
        notification: &Notification,
    ) -> std::result::Result<Delivery, ChannelError> {
        match self.sender(kind) {
            Some(sender) => self.send_with_timeout(sender.as_ref(), address, notification).await,
            None => Ok(Delivery::Unsupported),
        }
    }

    async fn send_with_timeout(
        &self,
        sender: &dyn ChannelSender,
        address: &str,
        notification: &Notification,
    ) -> std::result::Result<Delivery, ChannelError> {
        match tokio::time::timeout(self.channel_timeout, sender.send(address, notification)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    fn forget_push_token(&self, user_id: Uuid) {
        match self.db.clear_push_token(user_id) {
            Ok(true) => info!(%user_id, "Cleared rejected push token"),
            Ok(false) => {}
            Err(e) => warn!(%user_id, "Failed to clear push token: {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{NaiveDateTime, TimeZone, Utc};
    use medtime_db::models::MedicationRow;
    use medtime_types::models::Unit;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    pub(crate) enum Behavior {
        Deliver,
        Offline,
        Fail,
        RejectToken,
        Hang,
    }

    /// Records every send; behaves as configured.
    pub(crate) struct RecordingSender {
        pub kind: ChannelKind,
        pub behavior: Behavior,
        pub sent: Mutex<Vec<(String, Notification)>>,
    }

    impl RecordingSender {
        pub(crate) fn new(kind: ChannelKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn address(&self, user: &UserRow) -> Option<String> {
            match self.kind {
                ChannelKind::Push => user.push_token.clone(),
                _ => Some(user.id.to_string()),
            }
        }

        async fn send(
            &self,
            address: &str,
            notification: &Notification,
        ) -> std::result::Result<Delivery, ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), notification.clone()));
            match self.behavior {
                Behavior::Deliver => Ok(Delivery::Delivered),
                Behavior::Offline => Ok(Delivery::NotConnected),
                Behavior::Fail => Err(ChannelError::Provider {
                    status: 500,
                    message: "boom".into(),
                }),
                Behavior::RejectToken => Err(ChannelError::InvalidToken),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Delivery::Delivered)
                }
            }
        }
    }

    fn setup(push_token: Option<&str>) -> (Arc<Database>, UserRow, DueReminder) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut user = UserRow::new(Uuid::new_v4(), "ana", None, now);
        user.push_token = push_token.map(str::to_string);
        db.insert_user(&user).unwrap();

        let medication = MedicationRow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Amoxicillin".into(),
            description: None,
            start_at: NaiveDateTime::parse_from_str("2024-01-01 09:00", "%Y-%m-%d %H:%M").unwrap(),
            interval_hours: 8,
            is_recurring: false,
            duration_days: Some(7),
            total_quantity: 21.0,
            remaining_quantity: 21.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        db.insert_medication(&medication).unwrap();
        let batch = crate::schedule::materialize(medication.id, &[medication.start_at]);
        db.create_reminders(&batch, now).unwrap();
        let reminder = db.get_reminder(batch[0].id).unwrap().unwrap();

        (db, user, DueReminder { reminder, medication })
    }

    fn dispatcher(db: Arc<Database>, senders: Vec<Arc<dyn ChannelSender>>) -> Dispatcher {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        Dispatcher::new(db, clock, senders, Duration::from_secs(10), 5.0)
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_rest() {
        let (db, mut user, due) = setup(Some("device"));
        let push = RecordingSender::new(ChannelKind::Push, Behavior::Fail);
        let socket = RecordingSender::new(ChannelKind::Socket, Behavior::Deliver);
        let telegram = RecordingSender::new(ChannelKind::Telegram, Behavior::Deliver);
        let d = dispatcher(db.clone(), vec![push.clone(), socket.clone(), telegram.clone()]);

        let report = d.dispatch(&due, &mut user).await.unwrap();

        assert_eq!(report.outcome, DispatchOutcome::Dispatched);
        assert_eq!(report.failed, vec![ChannelKind::Push]);
        assert_eq!(report.delivered, vec![ChannelKind::Socket, ChannelKind::Telegram]);
        assert!(db.get_reminder(due.reminder.id).unwrap().unwrap().notified);
    }

    #[tokio::test]
    async fn reminder_is_sent_at_most_once() {
        let (db, mut user, due) = setup(None);
        let socket = RecordingSender::new(ChannelKind::Socket, Behavior::Deliver);
        let d = dispatcher(db, vec![socket.clone()]);

        d.dispatch(&due, &mut user).await.unwrap();
        let second = d.dispatch(&due, &mut user).await.unwrap();

        assert_eq!(second.outcome, DispatchOutcome::AlreadyHandled);
        assert_eq!(socket.count(), 1);
    }

    #[tokio::test]
    async fn users_without_address_are_skipped() {
        let (db, mut user, due) = setup(None);
        let push = RecordingSender::new(ChannelKind::Push, Behavior::Deliver);
        let d = dispatcher(db, vec![push.clone()]);

        let report = d.dispatch(&due, &mut user).await.unwrap();

        assert_eq!(push.count(), 0);
        assert!(report.delivered.is_empty() && report.failed.is_empty());
    }

    #[tokio::test]
    async fn rejected_push_token_is_cleared() {
        let (db, mut user, due) = setup(Some("stale-token"));
        let push = RecordingSender::new(ChannelKind::Push, Behavior::RejectToken);
        let d = dispatcher(db.clone(), vec![push.clone()]);

        let later = crate::schedule::materialize(
            due.medication.id,
            &[due.reminder.scheduled_for + chrono::Duration::hours(8)],
        );
        db.create_reminders(&later, Utc::now()).unwrap();
        let next = DueReminder {
            reminder: db.get_reminder(later[0].id).unwrap().unwrap(),
            medication: due.medication.clone(),
        };

        d.dispatch(&due, &mut user).await.unwrap();
        assert!(db.get_user(user.id).unwrap().unwrap().push_token.is_none());
        assert!(user.push_token.is_none());

        let report = d.dispatch(&next, &mut user).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::Dispatched);
        assert!(report.failed.is_empty());
        assert_eq!(push.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_channel_times_out() {
        let (db, mut user, due) = setup(None);
        let slow = RecordingSender::new(ChannelKind::Telegram, Behavior::Hang);
        let offline = RecordingSender::new(ChannelKind::Socket, Behavior::Offline);
        let d = dispatcher(db, vec![slow, offline]);

        let report = d.dispatch(&due, &mut user).await.unwrap();

        assert_eq!(report.failed, vec![ChannelKind::Telegram]);
        assert_eq!(report.not_connected, vec![ChannelKind::Socket]);
    }
}
