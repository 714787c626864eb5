use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::UserRow;

use crate::clock::{Clock, user_now};
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::horizon;
use crate::ticker::Tick;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub users: usize,
    pub due: usize,
    pub dispatched: usize,
    pub already_handled: usize,
    /// Users whose pass failed; they are retried on the next tick.
    pub failures: usize,
}

#[derive(Default)]
struct UserPass {
    due: usize,
    dispatched: usize,
    already_handled: usize,
}

/// Finds reminders entering each user's due window and hands them to the
/// dispatcher.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
}

impl Poller {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_users.max(1)));
        Self {
            inner: Arc::new(PollerInner {
                db,
                clock,
                config,
                dispatcher,
                permits,
            }),
        }
    }

    /// One pass over every user. Failures are contained per user.
    pub async fn poll(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        let users = match self.inner.db.find_users() {
            Ok(users) => users,
            Err(e) => {
                warn!("Poll: failed to list users: {}", e);
                summary.failures += 1;
                return summary;
            }
        };
        summary.users = users.len();

        let mut tasks = JoinSet::new();
        for user in users {
            let poller = self.clone();
            tasks.spawn(async move {
                let mut user = user;
                let user_id = user.id;
                let result = match poller.inner.permits.clone().acquire_owned().await {
                    Ok(_permit) => poller.poll_user(&mut user).await,
                    Err(_) => Ok(UserPass::default()),
                };
                (user_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(pass))) => {
                    summary.due += pass.due;
                    summary.dispatched += pass.dispatched;
                    summary.already_handled += pass.already_handled;
                }
                Ok((user_id, Err(e))) => {
                    warn!(%user_id, "Poll failed for user: {}", e);
                    summary.failures += 1;
                }
                Err(e) => {
                    warn!("Poll task panicked: {}", e);
                    summary.failures += 1;
                }
            }
        }

        summary
    }

    async fn poll_user(&self, user: &mut UserRow) -> Result<UserPass> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let now_local = user_now(now, user, inner.config.default_timezone);

        // Top up horizons first so freshly generated reminders are seen below.
        for medication in inner.db.find_recurring_medications(user.id)? {
            if let Err(e) = horizon::ensure_horizon(
                &inner.db,
                &medication,
                inner.config.min_horizon_days,
                now_local,
                now,
            ) {
                warn!(medication_id = %medication.id, "Failed to extend horizon: {}", e);
            }
        }

        let window_start = now_local - inner.config.past_tolerance();
        let window_end = now_local + inner.config.lookahead();
        let due = inner.db.find_due_reminders(user.id, window_start, window_end)?;

        let mut pass = UserPass {
            due: due.len(),
            ..UserPass::default()
        };
        if !due.is_empty() {
            debug!(user_id = %user.id, due = due.len(), %now_local, "Due reminders found");
        }

        for reminder in &due {
            let report = inner.dispatcher.dispatch(reminder, user).await?;
            match report.outcome {
                DispatchOutcome::Dispatched => pass.dispatched += 1,
                DispatchOutcome::AlreadyHandled => pass.already_handled += 1,
            }
        }

        Ok(pass)
    }
}

#[async_trait]
impl Tick for Poller {
    async fn tick(&self) {
        let summary = self.poll().await;
        if summary.due > 0 || summary.failures > 0 {
            info!(
                users = summary.users,
                due = summary.due,
                dispatched = summary.dispatched,
                failures = summary.failures,
                "Poll complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSender;
    use crate::clock::ManualClock;
    use crate::dispatcher::tests::{Behavior, RecordingSender};
    use crate::schedule;
    use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
    use medtime_db::models::MedicationRow;
    use medtime_types::models::{ChannelKind, Unit};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    struct Harness {
        db: Arc<Database>,
        clock: Arc<ManualClock>,
        socket: Arc<RecordingSender>,
        poller: Poller,
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(now));
        let socket = RecordingSender::new(ChannelKind::Socket, Behavior::Deliver);
        let config = Arc::new(EngineConfig::default());
        let senders: Vec<Arc<dyn ChannelSender>> = vec![socket.clone()];
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            clock.clone(),
            senders,
            config.channel_timeout,
            config.low_stock_threshold,
        ));
        let poller = Poller::new(db.clone(), clock.clone(), config, dispatcher);
        Harness {
            db,
            clock,
            socket,
            poller,
        }
    }

    fn user_with_dose(h: &Harness, tz: &str, recurring: bool, times: &[&str]) -> (Uuid, Vec<Uuid>) {
        let username = format!("u{}", Uuid::new_v4().simple());
        let user = UserRow::new(Uuid::new_v4(), &username, Some(tz), h.clock.now());
        h.db.insert_user(&user).unwrap();
        let medication = MedicationRow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Sertraline".into(),
            description: None,
            start_at: at(times[0]),
            interval_hours: 24,
            is_recurring: recurring,
            duration_days: (!recurring).then_some(10),
            total_quantity: 30.0,
            remaining_quantity: 30.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        h.db.insert_medication(&medication).unwrap();
        let instants: Vec<_> = times.iter().map(|t| at(t)).collect();
        let batch = schedule::materialize(medication.id, &instants);
        h.db.create_reminders(&batch, h.clock.now()).unwrap();
        (user.id, batch.iter().map(|r| r.id).collect())
    }

    fn notified(h: &Harness, id: Uuid) -> bool {
        h.db.get_reminder(id).unwrap().unwrap().notified
    }

    #[tokio::test]
    async fn window_includes_tolerance_and_lookahead_edges() {
        // 14:00 in Sao Paulo (UTC-3)
        let h = harness(Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap());
        let (_, ids) = user_with_dose(
            &h,
            "America/Sao_Paulo",
            false,
            &["2024-01-01 13:29", "2024-01-01 13:30", "2024-01-01 14:05", "2024-01-01 14:06"],
        );

        let summary = h.poller.poll().await;

        assert_eq!(summary.due, 2);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(
            ids.iter().map(|id| notified(&h, *id)).collect::<Vec<_>>(),
            vec![false, true, true, false]
        );
    }

    #[tokio::test]
    async fn due_reminder_is_delivered_exactly_once() {
        let h = harness(Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap());
        user_with_dose(&h, "America/Sao_Paulo", false, &["2024-01-01 14:00"]);

        h.poller.poll().await;
        h.clock.advance(Duration::minutes(1));
        let second = h.poller.poll().await;

        assert_eq!(second.due, 0);
        assert_eq!(h.socket.count(), 1);
    }

    #[tokio::test]
    async fn same_utc_instant_differs_per_timezone() {
        // 12:00 UTC is 09:00 in Sao Paulo and 21:00 in Tokyo.
        let h = harness(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let (_, sp) = user_with_dose(&h, "America/Sao_Paulo", false, &["2024-01-01 09:00"]);
        let (_, tokyo) = user_with_dose(&h, "Asia/Tokyo", false, &["2024-01-01 09:00"]);

        let summary = h.poller.poll().await;

        assert_eq!(summary.users, 2);
        assert!(notified(&h, sp[0]));
        assert!(!notified(&h, tokyo[0]));
    }

    #[tokio::test]
    async fn local_time_is_respected_across_dst_change() {
        // New York springs forward on 2024-03-10: 08:00 local is 12:00 UTC.
        let h = harness(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
        let (_, ids) = user_with_dose(
            &h,
            "America/New_York",
            false,
            &["2024-03-09 08:00", "2024-03-10 08:00"],
        );

        h.poller.poll().await;
        assert!(!notified(&h, ids[0]));
        assert!(notified(&h, ids[1]));

        // 13:00 UTC would have been 08:00 the day before; now it is 09:00.
        let h = harness(Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap());
        let (_, ids) = user_with_dose(&h, "America/New_York", false, &["2024-03-10 08:00"]);
        h.poller.poll().await;
        assert!(!notified(&h, ids[0]));
    }

    #[tokio::test]
    async fn recurring_horizon_is_topped_up_before_querying() {
        let h = harness(Utc.with_ymd_and_hms(2024, 1, 10, 11, 0, 0).unwrap());
        let user = UserRow::new(Uuid::new_v4(), "ana", Some("UTC"), h.clock.now());
        h.db.insert_user(&user).unwrap();
        let medication = MedicationRow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Losartan".into(),
            description: None,
            start_at: at("2024-01-01 11:00"),
            interval_hours: 12,
            is_recurring: true,
            duration_days: None,
            total_quantity: 60.0,
            remaining_quantity: 60.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        h.db.insert_medication(&medication).unwrap();

        let summary = h.poller.poll().await;

        assert_eq!(summary.dispatched, 1);
        assert_eq!(h.db.reminders_for_medication(medication.id).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn rejected_push_token_is_not_reused_in_the_same_pass() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        let push = RecordingSender::new(ChannelKind::Push, Behavior::RejectToken);
        let config = Arc::new(EngineConfig::default());
        let senders: Vec<Arc<dyn ChannelSender>> = vec![push.clone()];
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            clock.clone(),
            senders,
            config.channel_timeout,
            config.low_stock_threshold,
        ));
        let poller = Poller::new(db.clone(), clock.clone(), config, dispatcher);

        let mut user = UserRow::new(Uuid::new_v4(), "ana", Some("UTC"), clock.now());
        user.push_token = Some("stale-token".into());
        db.insert_user(&user).unwrap();
        let medication = MedicationRow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Ibuprofen".into(),
            description: None,
            start_at: at("2024-01-01 11:50"),
            interval_hours: 6,
            is_recurring: false,
            duration_days: Some(3),
            total_quantity: 12.0,
            remaining_quantity: 12.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        db.insert_medication(&medication).unwrap();
        let batch = schedule::materialize(
            medication.id,
            &[at("2024-01-01 11:50"), at("2024-01-01 12:00")],
        );
        db.create_reminders(&batch, clock.now()).unwrap();

        let summary = poller.poll().await;

        assert_eq!(summary.dispatched, 2);
        assert_eq!(push.count(), 1);
        assert!(db.get_user(user.id).unwrap().unwrap().push_token.is_none());
    }

    #[tokio::test]
    async fn failing_user_does_not_stop_others() {
        let h = harness(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let (_, ok) = user_with_dose(&h, "UTC", false, &["2024-01-01 12:00"]);

        // A row with a corrupt timestamp makes this user's due query fail.
        let (bad_user, _) = user_with_dose(&h, "UTC", false, &["2024-01-01 12:00"]);
        h.db.with_conn(|conn| {
            conn.execute(
                "UPDATE reminders SET created_at = 'garbage'
                 WHERE medication_id IN (SELECT id FROM medications WHERE user_id = ?1)",
                [bad_user.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let summary = h.poller.poll().await;

        assert_eq!(summary.users, 2);
        assert_eq!(summary.failures, 1);
        assert!(notified(&h, ok[0]));
    }
}
