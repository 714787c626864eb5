use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use medtime_db::Database;
use medtime_db::models::{DueReminder, NewMedicationLog, UserRow};

use crate::clock::{Clock, user_now};
use crate::config::EngineConfig;
use crate::ticker::Tick;

const ARCHIVE_NOTE: &str = "archived by retention sweep";
const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub archived: usize,
    pub expired: usize,
    pub pruned: usize,
    pub failures: usize,
}

/// Moves old reminders into history and prunes history past retention.
pub struct Sweeper {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl Sweeper {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, config: Arc<EngineConfig>) -> Self {
        Self { db, clock, config }
    }

    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let users = match self.db.find_users() {
            Ok(users) => users,
            Err(e) => {
                warn!("Sweep: failed to list users: {}", e);
                report.failures += 1;
                Vec::new()
            }
        };

        for user in &users {
            match self.archive_resolved(user, now) {
                Ok(n) => report.archived += n,
                Err(e) => {
                    warn!(user_id = %user.id, "Sweep: archiving resolved reminders failed: {}", e);
                    report.failures += 1;
                }
            }
            match self.expire_stale(user, now) {
                Ok(n) => report.expired += n,
                Err(e) => {
                    warn!(user_id = %user.id, "Sweep: expiring stale reminders failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        let history_cutoff = now - Duration::days(self.config.history_retention_days);
        match self.db.delete_history_older_than(history_cutoff) {
            Ok(n) => report.pruned = n,
            Err(e) => {
                warn!("Sweep: pruning history failed: {}", e);
                report.failures += 1;
            }
        }

        report
    }

    fn cutoff(&self, user: &UserRow, now: DateTime<Utc>) -> chrono::NaiveDateTime {
        user_now(now, user, self.config.default_timezone) - Duration::days(self.config.retention_days)
    }

    /// Taken or skipped reminders past retention go to history.
    fn archive_resolved(&self, user: &UserRow, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let resolved = self.db.find_resolved_before(user.id, self.cutoff(user, now))?;
        self.archive(&resolved, now, |due| NewMedicationLog {
            medication_id: due.medication.id,
            reminder_id: Some(due.reminder.id),
            scheduled_for: Some(due.reminder.scheduled_for),
            taken_at: due.reminder.taken_at,
            skipped: due.reminder.skipped,
            skipped_reason: due.reminder.skipped_reason.clone(),
            notes: ARCHIVE_NOTE.to_string(),
        })
    }

    /// Pending reminders of recurring medications that nobody acted on.
    fn expire_stale(&self, user: &UserRow, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let stale = self.db.find_stale_recurring_before(user.id, self.cutoff(user, now))?;
        self.archive(&stale, now, |due| NewMedicationLog {
            medication_id: due.medication.id,
            reminder_id: Some(due.reminder.id),
            scheduled_for: Some(due.reminder.scheduled_for),
            taken_at: None,
            skipped: true,
            skipped_reason: Some(EXPIRED_REASON.to_string()),
            notes: EXPIRED_REASON.to_string(),
        })
    }

    /// Log first, then delete. A crash in between is repaired by the next
    /// sweep, since log inserts are ignored for already-archived reminders.
    fn archive(
        &self,
        rows: &[DueReminder],
        now: DateTime<Utc>,
        to_log: impl Fn(&DueReminder) -> NewMedicationLog,
    ) -> anyhow::Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let logs: Vec<_> = rows.iter().map(to_log).collect();
        let ids: Vec<_> = rows.iter().map(|due| due.reminder.id).collect();

        self.db.move_to_history(&logs, now)?;
        self.db.delete_reminders(&ids)
    }
}

#[async_trait]
impl Tick for Sweeper {
    async fn tick(&self) {
        let report = self.sweep();
        info!(
            archived = report.archived,
            expired = report.expired,
            pruned = report.pruned,
            failures = report.failures,
            "Sweep complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schedule;
    use chrono::{NaiveDateTime, TimeZone};
    use medtime_db::models::MedicationRow;
    use medtime_db::queries;
    use medtime_types::models::Unit;
    use uuid::Uuid;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    struct Fixture {
        db: Arc<Database>,
        clock: Arc<ManualClock>,
        sweeper: Sweeper,
        medication_id: Uuid,
    }

    fn fixture(recurring: bool) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        // 2024-03-01 12:00 local in UTC+0
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let user = UserRow::new(Uuid::new_v4(), "ana", Some("UTC"), now);
        db.insert_user(&user).unwrap();

        let medication = MedicationRow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Omeprazole".into(),
            description: None,
            start_at: at("2024-01-01 12:00"),
            interval_hours: 24,
            is_recurring: recurring,
            duration_days: (!recurring).then_some(90),
            total_quantity: 90.0,
            remaining_quantity: 90.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        db.insert_medication(&medication).unwrap();

        let sweeper = Sweeper::new(db.clone(), clock.clone(), Arc::new(EngineConfig::default()));
        Fixture {
            db,
            clock,
            sweeper,
            medication_id: medication.id,
        }
    }

    fn add(f: &Fixture, when: &str, taken: bool) -> Uuid {
        let batch = schedule::materialize(f.medication_id, &[at(when)]);
        f.db.create_reminders(&batch, f.clock.now()).unwrap();
        if taken {
            f.db.with_tx(|conn| queries::set_taken(conn, batch[0].id, true, Some(f.clock.now()), f.clock.now()))
                .unwrap();
        }
        batch[0].id
    }

    #[test]
    fn archive_cutoff_is_strict() {
        let f = fixture(false);
        // cutoff is 2024-01-31 12:00
        let old = add(&f, "2024-01-31 11:59", true);
        let boundary = add(&f, "2024-01-31 12:00", true);

        let report = f.sweeper.sweep();

        assert_eq!(report.archived, 1);
        assert!(f.db.get_reminder(old).unwrap().is_none());
        assert!(f.db.get_reminder(boundary).unwrap().is_some());

        let history = f.db.history_for_medication(f.medication_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].notes, ARCHIVE_NOTE);
        assert!(history[0].taken_at.is_some());
    }

    #[test]
    fn resweep_does_not_duplicate_history() {
        let f = fixture(false);
        add(&f, "2024-01-10 12:00", true);

        f.sweeper.sweep();
        let second = f.sweeper.sweep();

        assert_eq!(second, SweepReport::default());
        assert_eq!(f.db.history_for_medication(f.medication_id).unwrap().len(), 1);
    }

    #[test]
    fn stale_recurring_reminders_expire() {
        let f = fixture(true);
        let stale = add(&f, "2024-01-10 12:00", false);
        let recent = add(&f, "2024-02-20 12:00", false);

        let report = f.sweeper.sweep();

        assert_eq!(report.expired, 1);
        assert!(f.db.get_reminder(stale).unwrap().is_none());
        assert!(f.db.get_reminder(recent).unwrap().is_some());
        let history = f.db.history_for_medication(f.medication_id).unwrap();
        assert!(history[0].skipped);
        assert_eq!(history[0].skipped_reason.as_deref(), Some("expired"));
    }

    #[test]
    fn finite_pending_reminders_are_left_alone() {
        let f = fixture(false);
        let pending = add(&f, "2024-01-10 12:00", false);

        f.sweeper.sweep();

        assert!(f.db.get_reminder(pending).unwrap().is_some());
    }

    #[test]
    fn history_past_retention_is_pruned() {
        let f = fixture(false);
        add(&f, "2024-01-10 12:00", true);
        f.sweeper.sweep();

        f.clock.advance(Duration::days(91));
        let report = f.sweeper.sweep();

        assert_eq!(report.pruned, 1);
        assert!(f.db.history_for_medication(f.medication_id).unwrap().is_empty());
    }
}
