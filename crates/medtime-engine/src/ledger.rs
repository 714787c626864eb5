use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::{MedicationRow, NewMedicationLog, ReminderRow};
use medtime_db::queries;

use crate::clock::{Clock, user_now};
use crate::config::StockPolicy;
use crate::error::{EngineError, Result};
use crate::horizon;

/// Result of a taken/untaken request.
#[derive(Debug, Clone)]
pub struct Transition {
    pub reminder: ReminderRow,
    pub medication: MedicationRow,
    /// False when the reminder was already in the requested state.
    pub changed: bool,
}

enum SkipResult {
    Skipped(ReminderRow),
    AlreadyTaken,
}

/// Keeps medication stock in step with taken doses.
pub struct StockLedger {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    policy: StockPolicy,
    reactive_horizon_days: i64,
    default_timezone: Tz,
}

impl StockLedger {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        policy: StockPolicy,
        reactive_horizon_days: i64,
        default_timezone: Tz,
    ) -> Self {
        Self {
            db,
            clock,
            policy,
            reactive_horizon_days,
            default_timezone,
        }
    }

    /// Mark a reminder taken (`taken_now = true`) or untaken, adjusting stock
    /// by one dose in the same transaction.
    pub fn apply_taken_transition(&self, reminder_id: Uuid, taken_now: bool) -> Result<Transition> {
        self.transition(reminder_id, taken_now, false)
    }

    /// A "mark as taken" from a chat button or push action. Also marks the
    /// reminder notified so the poller will not send it again.
    pub fn apply_channel_action(&self, reminder_id: Uuid) -> Result<Transition> {
        self.transition(reminder_id, true, true)
    }

    fn transition(&self, reminder_id: Uuid, taken_now: bool, mark_notified: bool) -> Result<Transition> {
        let now = self.clock.now();
        let policy = self.policy;

        let outcome = self.db.with_tx(|conn| {
            let Some(reminder) = queries::get_reminder(conn, reminder_id)? else {
                return Ok(None);
            };
            let Some(medication) = queries::get_medication(conn, reminder.medication_id)? else {
                return Ok(None);
            };

            if mark_notified && !reminder.notified {
                queries::mark_notified(conn, reminder_id, now)?;
            }

            let changed = reminder.taken != taken_now;
            if changed {
                let taken_at = taken_now.then_some(now);
                queries::set_taken(conn, reminder_id, taken_now, taken_at, now)?;

                // A dose taken after all replaces the skip and its history entry.
                if taken_now && reminder.skipped {
                    queries::clear_skipped(conn, reminder_id, now)?;
                    queries::delete_log_for_reminder(conn, reminder_id)?;
                }

                let delta = if taken_now {
                    -medication.dosage_quantity
                } else {
                    medication.dosage_quantity
                };
                let next = medication.remaining_quantity + delta;
                match policy {
                    StockPolicy::Allow => {
                        queries::update_medication_stock(conn, medication.id, delta)?;
                        if next < 0.0 {
                            warn!(
                                medication_id = %medication.id,
                                remaining = next,
                                "Stock went negative"
                            );
                        }
                    }
                    StockPolicy::Clamp => {
                        queries::set_medication_stock(conn, medication.id, next.max(0.0))?;
                    }
                }
            }

            let reminder = queries::get_reminder(conn, reminder_id)?
                .ok_or_else(|| anyhow::anyhow!("reminder {} vanished mid-transaction", reminder_id))?;
            let medication = queries::get_medication(conn, reminder.medication_id)?
                .ok_or_else(|| anyhow::anyhow!("medication {} vanished mid-transaction", reminder.medication_id))?;

            Ok(Some(Transition {
                reminder,
                medication,
                changed,
            }))
        })?;

        let transition = outcome.ok_or(EngineError::NotFound("reminder", reminder_id))?;

        if transition.changed {
            info!(
                %reminder_id,
                taken = taken_now,
                remaining = transition.medication.remaining_quantity,
                "Reminder updated"
            );
            if transition.medication.is_recurring {
                self.refill_horizon(&transition.medication);
            }
        }

        Ok(transition)
    }

    fn refill_horizon(&self, medication: &MedicationRow) {
        let now = self.clock.now();
        let result = self
            .db
            .get_user(medication.user_id)
            .map_err(EngineError::from)
            .and_then(|user| {
                let user = user.ok_or(EngineError::NotFound("user", medication.user_id))?;
                let now_local = user_now(now, &user, self.default_timezone);
                horizon::ensure_horizon(&self.db, medication, self.reactive_horizon_days, now_local, now)
            });

        if let Err(e) = result {
            warn!(medication_id = %medication.id, "Failed to extend horizon: {}", e);
        }
    }

    /// Skip a pending reminder and record it in history.
    pub fn skip_reminder(&self, reminder_id: Uuid, reason: &str) -> Result<ReminderRow> {
        let now = self.clock.now();
        let reason = match reason.trim() {
            "" => "skipped by user",
            r => r,
        };

        let outcome = self.db.with_tx(|conn| {
            let Some(reminder) = queries::get_reminder(conn, reminder_id)? else {
                return Ok(None);
            };
            if reminder.taken {
                return Ok(Some(SkipResult::AlreadyTaken));
            }
            if reminder.skipped {
                return Ok(Some(SkipResult::Skipped(reminder)));
            }

            queries::set_skipped(conn, reminder_id, reason, now)?;
            queries::insert_logs(
                conn,
                &[NewMedicationLog {
                    medication_id: reminder.medication_id,
                    reminder_id: Some(reminder_id),
                    scheduled_for: Some(reminder.scheduled_for),
                    taken_at: None,
                    skipped: true,
                    skipped_reason: Some(reason.to_string()),
                    notes: reason.to_string(),
                }],
                now,
            )?;

            let updated = queries::get_reminder(conn, reminder_id)?
                .ok_or_else(|| anyhow::anyhow!("reminder {} vanished mid-transaction", reminder_id))?;
            Ok(Some(SkipResult::Skipped(updated)))
        })?;

        match outcome {
            Some(SkipResult::Skipped(reminder)) => {
                info!(%reminder_id, reason, "Reminder skipped");
                Ok(reminder)
            }
            Some(SkipResult::AlreadyTaken) => Err(EngineError::Validation(
                "a taken reminder cannot be skipped".into(),
            )),
            None => Err(EngineError::NotFound("reminder", reminder_id)),
        }
    }
}
