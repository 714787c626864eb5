use std::sync::Arc;

use chrono::NaiveTime;
use tracing::{info, warn};
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::NewMedicationLog;
use medtime_types::api::{SyncedMedication, SyncedReminder};

use crate::clock::{Clock, user_now};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

const SYNC_LIMIT: u32 = 50;
const EXPIRED_NOTE: &str = "notification not delivered: tolerance exceeded";

/// Pull-based delivery for desktop clients that poll instead of holding a socket.
pub struct DesktopSync {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl DesktopSync {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, config: Arc<EngineConfig>) -> Self {
        Self { db, clock, config }
    }

    /// Pending reminders for today that appeared after desktop sync was turned
    /// on. Reminders already past the tolerance are archived instead of returned.
    pub fn pending_for(&self, user_id: Uuid) -> Result<Vec<SyncedReminder>> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or(EngineError::NotFound("user", user_id))?;
        if !user.desktop_sync_enabled {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let now_local = user_now(now, &user, self.config.default_timezone);
        let day_start = now_local.date().and_time(NaiveTime::MIN);
        let watermark = user.desktop_sync_enabled_at.unwrap_or(user.updated_at);
        let oldest_deliverable = now_local - self.config.past_tolerance();

        let candidates = self
            .db
            .find_sync_candidates(user_id, day_start, watermark, SYNC_LIMIT)?;
        let (expired, live): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|due| due.reminder.scheduled_for < oldest_deliverable);

        if !expired.is_empty() {
            let logs: Vec<_> = expired
                .iter()
                .map(|due| NewMedicationLog {
                    medication_id: due.medication.id,
                    reminder_id: Some(due.reminder.id),
                    scheduled_for: Some(due.reminder.scheduled_for),
                    taken_at: None,
                    skipped: false,
                    skipped_reason: None,
                    notes: EXPIRED_NOTE.to_string(),
                })
                .collect();
            let ids: Vec<_> = expired.iter().map(|due| due.reminder.id).collect();

            // A failed archive leaves the reminders in place for the next sync.
            match self
                .db
                .move_to_history(&logs, now)
                .and_then(|_| self.db.delete_reminders(&ids))
            {
                Ok(deleted) => info!(%user_id, deleted, "Archived undelivered reminders"),
                Err(e) => warn!(%user_id, "Failed to archive undelivered reminders: {}", e),
            }
        }

        Ok(live
            .into_iter()
            .map(|due| SyncedReminder {
                id: due.reminder.id,
                scheduled_for: due.reminder.scheduled_for,
                medication: SyncedMedication {
                    id: due.medication.id,
                    name: due.medication.name,
                    dosage_quantity: due.medication.dosage_quantity,
                    unit: due.medication.unit,
                },
            })
            .collect())
    }
}
