use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, info};
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::{MedicationRow, ReminderRow};

use crate::channels::{telegram, whatsapp};
use crate::clock::resolve_timezone;
use crate::error::{EngineError, Result};
use crate::ledger::StockLedger;
use crate::notification::Notification;

#[derive(Debug)]
pub enum ActionOutcome {
    Taken {
        reminder: ReminderRow,
        medication: MedicationRow,
    },
    AlreadyTaken {
        reminder: ReminderRow,
        medication: MedicationRow,
    },
    NotFound,
}

/// Handles "mark as taken" actions arriving from chat buttons.
pub struct ChannelActions {
    db: Arc<Database>,
    ledger: Arc<StockLedger>,
    default_timezone: Tz,
}

impl ChannelActions {
    pub fn new(db: Arc<Database>, ledger: Arc<StockLedger>, default_timezone: Tz) -> Self {
        Self {
            db,
            ledger,
            default_timezone,
        }
    }

    /// Mark `reminder_id` as taken on behalf of `user_id`. Reminders owned by
    /// someone else are reported as not found.
    pub fn on_channel_action_taken(&self, user_id: Uuid, reminder_id: Uuid) -> Result<ActionOutcome> {
        if self.db.reminder_owner(reminder_id)? != Some(user_id) {
            debug!(%user_id, %reminder_id, "Action for unknown or foreign reminder");
            return Ok(ActionOutcome::NotFound);
        }

        match self.ledger.apply_channel_action(reminder_id) {
            Ok(t) if t.changed => {
                info!(%user_id, %reminder_id, "Dose confirmed from chat");
                Ok(ActionOutcome::Taken {
                    reminder: t.reminder,
                    medication: t.medication,
                })
            }
            Ok(t) => Ok(ActionOutcome::AlreadyTaken {
                reminder: t.reminder,
                medication: t.medication,
            }),
            Err(EngineError::NotFound(..)) => Ok(ActionOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Chat reply for an outcome, with times shown in the owner's timezone.
    pub fn confirmation(&self, outcome: &ActionOutcome, timezone: Option<&str>) -> Option<Notification> {
        let tz = resolve_timezone(timezone, self.default_timezone);
        match outcome {
            ActionOutcome::Taken {
                reminder,
                medication,
            } => {
                let taken_at = reminder.taken_at.unwrap_or(reminder.updated_at);
                Some(Notification::DoseConfirmed {
                    reminder_id: reminder.id,
                    medication_name: medication.name.clone(),
                    taken_at: taken_at.with_timezone(&tz).naive_local(),
                })
            }
            ActionOutcome::AlreadyTaken {
                reminder,
                medication,
            } => Some(Notification::AlreadyTaken {
                reminder_id: reminder.id,
                medication_name: medication.name.clone(),
            }),
            ActionOutcome::NotFound => None,
        }
    }
}

/// Reminder id from a Telegram callback (`taken:<id>`) or a WhatsApp button
/// id (`medication_taken:<id>`).
pub fn parse_taken_action(data: &str) -> Option<Uuid> {
    let data = data.trim();
    let id = data
        .strip_prefix(whatsapp::TAKEN_ACTION_PREFIX)
        .or_else(|| data.strip_prefix(telegram::TAKEN_ACTION_PREFIX))?;
    id.parse().ok()
}
