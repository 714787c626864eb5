use crate::Database;
use crate::models::{
    DueReminder, MedicationLogRow, MedicationRow, NewMedicationLog, NewReminder, ReminderRow,
    UserRow, col_local, col_opt_local, col_opt_utc, col_opt_uuid, col_unit, col_utc, col_uuid,
    fmt_local, fmt_utc, parse_local,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, timezone, push_token, socket_enabled, whatsapp_enabled, \
     whatsapp_number, telegram_enabled, telegram_chat_id, desktop_sync_enabled, \
     desktop_sync_enabled_at, updated_at";

const REMINDER_COLUMNS: &str = "r.id, r.medication_id, r.scheduled_for, r.taken, r.taken_at, \
     r.skipped, r.skipped_reason, r.notified, r.created_at, r.updated_at";

const MEDICATION_COLUMNS: &str = "m.id, m.user_id, m.name, m.description, m.start_at, \
     m.interval_hours, m.is_recurring, m.duration_days, m.total_quantity, m.remaining_quantity, \
     m.unit, m.dosage_quantity";

/// Number of columns in `REMINDER_COLUMNS`; medication columns follow it in joins.
const REMINDER_WIDTH: usize = 10;

impl Database {
    // -- Users --

    pub fn insert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, timezone, push_token, socket_enabled,
                    whatsapp_enabled, whatsapp_number, telegram_enabled, telegram_chat_id,
                    desktop_sync_enabled, desktop_sync_enabled_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.timezone,
                    user.push_token,
                    user.socket_enabled,
                    user.whatsapp_enabled,
                    user.whatsapp_number,
                    user.telegram_enabled,
                    user.telegram_chat_id,
                    user.desktop_sync_enabled,
                    user.desktop_sync_enabled_at.map(fmt_utc),
                    fmt_utc(user.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| get_user(conn, id))
    }

    pub fn find_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Enabled WhatsApp user owning `number` (stored with leading '+').
    pub fn find_user_by_whatsapp(&self, number: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE whatsapp_number = ?1 AND whatsapp_enabled = 1"
                ),
                [number],
                map_user,
            )
            .optional()
        })
    }

    pub fn find_user_by_telegram_chat(&self, chat_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE telegram_chat_id = ?1 AND telegram_enabled = 1"
                ),
                [chat_id],
                map_user,
            )
            .optional()
        })
    }

    /// Drop a push token the provider rejected. Returns true if one was cleared.
    pub fn clear_push_token(&self, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET push_token = NULL WHERE id = ?1 AND push_token IS NOT NULL",
                [user_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Medications --

    pub fn insert_medication(&self, med: &MedicationRow) -> Result<()> {
        self.with_conn(|conn| insert_medication(conn, med))
    }

    pub fn get_medication(&self, id: Uuid) -> Result<Option<MedicationRow>> {
        self.with_conn(|conn| get_medication(conn, id))
    }

    pub fn find_recurring_medications(&self, user_id: Uuid) -> Result<Vec<MedicationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEDICATION_COLUMNS} FROM medications m
                 WHERE m.user_id = ?1 AND m.is_recurring = 1"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| map_medication(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Id of an existing medication with the same dosing rule, if any.
    pub fn find_duplicate_medication(
        &self,
        user_id: Uuid,
        name: &str,
        start_at: NaiveDateTime,
        interval_hours: i64,
        duration_days: Option<i64>,
    ) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM medications
                 WHERE user_id = ?1 AND name = ?2 AND start_at = ?3
                   AND interval_hours = ?4 AND duration_days IS ?5",
                params![
                    user_id.to_string(),
                    name,
                    fmt_local(start_at),
                    interval_hours,
                    duration_days
                ],
                |row| col_uuid(row, 0),
            )
            .optional()
        })
    }

    pub fn update_medication_stock(&self, id: Uuid, delta: f64) -> Result<()> {
        self.with_conn(|conn| update_medication_stock(conn, id, delta))
    }

    // -- Reminders --

    /// Bulk insert with skip-duplicates semantics: rows colliding on
    /// (medication_id, scheduled_for) are ignored. Returns rows actually inserted.
    pub fn create_reminders(&self, batch: &[NewReminder], now: DateTime<Utc>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.with_tx(|conn| create_reminders(conn, batch, now))
    }

    pub fn get_reminder(&self, id: Uuid) -> Result<Option<ReminderRow>> {
        self.with_conn(|conn| get_reminder(conn, id))
    }

    /// The user owning a reminder through its medication.
    pub fn reminder_owner(&self, reminder_id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT m.user_id FROM reminders r
                     JOIN medications m ON m.id = r.medication_id
                     WHERE r.id = ?1",
                    [reminder_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match owner {
                Some(id) => Ok(Some(Uuid::parse_str(&id)?)),
                None => Ok(None),
            }
        })
    }

    pub fn reminders_for_medication(&self, medication_id: Uuid) -> Result<Vec<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders r
                 WHERE r.medication_id = ?1
                 ORDER BY r.scheduled_for"
            ))?;
            let rows = stmt
                .query_map([medication_id.to_string()], |row| map_reminder(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Pending, un-notified reminders of `user_id` scheduled inside the
    /// inclusive local window `[start, end]`.
    pub fn find_due_reminders(
        &self,
        user_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DueReminder>> {
        self.with_conn(|conn| {
            query_joined(
                conn,
                "m.user_id = ?1 AND r.taken = 0 AND r.skipped = 0 AND r.notified = 0
                 AND r.scheduled_for >= ?2 AND r.scheduled_for <= ?3",
                params![user_id.to_string(), fmt_local(start), fmt_local(end)],
            )
        })
    }

    pub fn count_pending_from(&self, medication_id: Uuid, from: NaiveDateTime) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM reminders
                 WHERE medication_id = ?1 AND taken = 0 AND skipped = 0 AND scheduled_for >= ?2",
                params![medication_id.to_string(), fmt_local(from)],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn last_scheduled_for(&self, medication_id: Uuid) -> Result<Option<NaiveDateTime>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn.query_row(
                "SELECT MAX(scheduled_for) FROM reminders WHERE medication_id = ?1",
                [medication_id.to_string()],
                |row| row.get(0),
            )?;
            raw.map(|s| parse_local(&s).map_err(anyhow::Error::from))
                .transpose()
        })
    }

    /// Atomically claim a reminder for delivery. Only the first caller wins;
    /// reminders already notified, taken or skipped are never claimed.
    pub fn claim_for_notification(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reminders SET notified = 1, updated_at = ?2
                 WHERE id = ?1 AND notified = 0 AND taken = 0 AND skipped = 0",
                params![id.to_string(), fmt_utc(now)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Taken or skipped reminders of `user_id` scheduled strictly before `cutoff`.
    pub fn find_resolved_before(
        &self,
        user_id: Uuid,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<DueReminder>> {
        self.with_conn(|conn| {
            query_joined(
                conn,
                "m.user_id = ?1 AND (r.taken = 1 OR r.skipped = 1) AND r.scheduled_for < ?2",
                params![user_id.to_string(), fmt_local(cutoff)],
            )
        })
    }

    /// Pending reminders of recurring medications scheduled strictly before `cutoff`.
    pub fn find_stale_recurring_before(
        &self,
        user_id: Uuid,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<DueReminder>> {
        self.with_conn(|conn| {
            query_joined(
                conn,
                "m.user_id = ?1 AND m.is_recurring = 1 AND r.taken = 0 AND r.skipped = 0
                 AND r.scheduled_for < ?2",
                params![user_id.to_string(), fmt_local(cutoff)],
            )
        })
    }

    /// Pending reminders from `from` onwards that were created or touched after
    /// `watermark`, oldest first.
    pub fn find_sync_candidates(
        &self,
        user_id: Uuid,
        from: NaiveDateTime,
        watermark: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueReminder>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REMINDER_COLUMNS}, {MEDICATION_COLUMNS}
                 FROM reminders r
                 JOIN medications m ON m.id = r.medication_id
                 WHERE m.user_id = ?1 AND r.taken = 0 AND r.skipped = 0
                   AND r.scheduled_for >= ?2
                   AND (r.updated_at > ?3 OR r.created_at > ?3)
                 ORDER BY r.scheduled_for
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![user_id.to_string(), fmt_local(from), fmt_utc(watermark), limit],
                    map_due,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_reminders(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_tx(|conn| delete_reminders(conn, ids))
    }

    // -- History --

    /// Append history entries, ignoring any whose reminder was already archived.
    pub fn move_to_history(&self, logs: &[NewMedicationLog], now: DateTime<Utc>) -> Result<usize> {
        if logs.is_empty() {
            return Ok(0);
        }
        self.with_tx(|conn| insert_logs(conn, logs, now))
    }

    pub fn delete_history_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM medication_logs WHERE created_at < ?1",
                [fmt_utc(cutoff)],
            )?;
            Ok(deleted)
        })
    }

    pub fn history_for_medication(&self, medication_id: Uuid) -> Result<Vec<MedicationLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, medication_id, reminder_id, scheduled_for, taken_at, skipped,
                        skipped_reason, notes, created_at
                 FROM medication_logs
                 WHERE medication_id = ?1
                 ORDER BY created_at, scheduled_for",
            )?;
            let rows = stmt
                .query_map([medication_id.to_string()], |row| {
                    Ok(MedicationLogRow {
                        id: col_uuid(row, 0)?,
                        medication_id: col_uuid(row, 1)?,
                        reminder_id: col_opt_uuid(row, 2)?,
                        scheduled_for: col_opt_local(row, 3)?,
                        taken_at: col_opt_utc(row, 4)?,
                        skipped: row.get(5)?,
                        skipped_reason: row.get(6)?,
                        notes: row.get(7)?,
                        created_at: col_utc(row, 8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

// -- Connection-level operations, usable inside `Database::with_tx` --

pub fn get_user(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id.to_string()],
        map_user,
    )
    .optional()
}

pub fn get_medication(conn: &Connection, id: Uuid) -> Result<Option<MedicationRow>> {
    conn.query_row(
        &format!("SELECT {MEDICATION_COLUMNS} FROM medications m WHERE m.id = ?1"),
        [id.to_string()],
        |row| map_medication(row, 0),
    )
    .optional()
}

pub fn insert_medication(conn: &Connection, med: &MedicationRow) -> Result<()> {
    conn.execute(
        "INSERT INTO medications (id, user_id, name, description, start_at, interval_hours,
            is_recurring, duration_days, total_quantity, remaining_quantity, unit,
            dosage_quantity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            med.id.to_string(),
            med.user_id.to_string(),
            med.name,
            med.description,
            fmt_local(med.start_at),
            med.interval_hours,
            med.is_recurring,
            med.duration_days,
            med.total_quantity,
            med.remaining_quantity,
            med.unit.as_str(),
            med.dosage_quantity,
        ],
    )?;
    Ok(())
}

pub fn get_reminder(conn: &Connection, id: Uuid) -> Result<Option<ReminderRow>> {
    conn.query_row(
        &format!("SELECT {REMINDER_COLUMNS} FROM reminders r WHERE r.id = ?1"),
        [id.to_string()],
        |row| map_reminder(row, 0),
    )
    .optional()
}

pub fn create_reminders(
    conn: &Connection,
    batch: &[NewReminder],
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO reminders (id, medication_id, scheduled_for, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
    )?;
    let stamp = fmt_utc(now);
    let mut inserted = 0;
    for r in batch {
        inserted += stmt.execute(params![
            r.id.to_string(),
            r.medication_id.to_string(),
            fmt_local(r.scheduled_for),
            stamp,
        ])?;
    }
    Ok(inserted)
}

pub fn set_taken(
    conn: &Connection,
    id: Uuid,
    taken: bool,
    taken_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE reminders SET taken = ?2, taken_at = ?3, updated_at = ?4 WHERE id = ?1",
        params![id.to_string(), taken, taken_at.map(fmt_utc), fmt_utc(now)],
    )?;
    Ok(())
}

pub fn mark_notified(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE reminders SET notified = 1, updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), fmt_utc(now)],
    )?;
    Ok(())
}

pub fn set_skipped(conn: &Connection, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE reminders SET skipped = 1, skipped_reason = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), reason, fmt_utc(now)],
    )?;
    Ok(())
}

pub fn clear_skipped(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE reminders SET skipped = 0, skipped_reason = NULL, updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), fmt_utc(now)],
    )?;
    Ok(())
}

/// Drop the history entry written for a reminder that is still live.
pub fn delete_log_for_reminder(conn: &Connection, reminder_id: Uuid) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM medication_logs WHERE reminder_id = ?1",
        [reminder_id.to_string()],
    )?;
    Ok(deleted)
}

pub fn update_medication_stock(conn: &Connection, id: Uuid, delta: f64) -> Result<()> {
    conn.execute(
        "UPDATE medications SET remaining_quantity = remaining_quantity + ?2 WHERE id = ?1",
        params![id.to_string(), delta],
    )?;
    Ok(())
}

pub fn set_medication_stock(conn: &Connection, id: Uuid, remaining: f64) -> Result<()> {
    conn.execute(
        "UPDATE medications SET remaining_quantity = ?2 WHERE id = ?1",
        params![id.to_string(), remaining],
    )?;
    Ok(())
}

pub fn insert_logs(conn: &Connection, logs: &[NewMedicationLog], now: DateTime<Utc>) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO medication_logs
            (id, medication_id, reminder_id, scheduled_for, taken_at, skipped, skipped_reason,
             notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let stamp = fmt_utc(now);
    let mut inserted = 0;
    for log in logs {
        inserted += stmt.execute(params![
            Uuid::new_v4().to_string(),
            log.medication_id.to_string(),
            log.reminder_id.map(|id| id.to_string()),
            log.scheduled_for.map(fmt_local),
            log.taken_at.map(fmt_utc),
            log.skipped,
            log.skipped_reason,
            log.notes,
            stamp,
        ])?;
    }
    Ok(inserted)
}

pub fn delete_reminders(conn: &Connection, ids: &[Uuid]) -> Result<usize> {
    let mut stmt = conn.prepare("DELETE FROM reminders WHERE id = ?1")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute([id.to_string()])?;
    }
    Ok(deleted)
}

// -- Row mapping --

fn query_joined(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DueReminder>> {
    let sql = format!(
        "SELECT {REMINDER_COLUMNS}, {MEDICATION_COLUMNS}
         FROM reminders r
         JOIN medications m ON m.id = r.medication_id
         WHERE {filter}
         ORDER BY r.scheduled_for"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, map_due)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_due(row: &Row<'_>) -> rusqlite::Result<DueReminder> {
    Ok(DueReminder {
        reminder: map_reminder(row, 0)?,
        medication: map_medication(row, REMINDER_WIDTH)?,
    })
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: col_uuid(row, 0)?,
        username: row.get(1)?,
        timezone: row.get(2)?,
        push_token: row.get(3)?,
        socket_enabled: row.get(4)?,
        whatsapp_enabled: row.get(5)?,
        whatsapp_number: row.get(6)?,
        telegram_enabled: row.get(7)?,
        telegram_chat_id: row.get(8)?,
        desktop_sync_enabled: row.get(9)?,
        desktop_sync_enabled_at: col_opt_utc(row, 10)?,
        updated_at: col_utc(row, 11)?,
    })
}

fn map_reminder(row: &Row<'_>, at: usize) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: col_uuid(row, at)?,
        medication_id: col_uuid(row, at + 1)?,
        scheduled_for: col_local(row, at + 2)?,
        taken: row.get(at + 3)?,
        taken_at: col_opt_utc(row, at + 4)?,
        skipped: row.get(at + 5)?,
        skipped_reason: row.get(at + 6)?,
        notified: row.get(at + 7)?,
        created_at: col_utc(row, at + 8)?,
        updated_at: col_utc(row, at + 9)?,
    })
}

fn map_medication(row: &Row<'_>, at: usize) -> rusqlite::Result<MedicationRow> {
    Ok(MedicationRow {
        id: col_uuid(row, at)?,
        user_id: col_uuid(row, at + 1)?,
        name: row.get(at + 2)?,
        description: row.get(at + 3)?,
        start_at: col_local(row, at + 4)?,
        interval_hours: row.get(at + 5)?,
        is_recurring: row.get(at + 6)?,
        duration_days: row.get(at + 7)?,
        total_quantity: row.get(at + 8)?,
        remaining_quantity: row.get(at + 9)?,
        unit: col_unit(row, at + 10)?,
        dosage_quantity: row.get(at + 11)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use medtime_types::models::Unit;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn seed(db: &Database, recurring: bool) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        db.insert_user(&UserRow::new(user_id, "ana", Some("America/Sao_Paulo"), now()))
            .unwrap();

        let med_id = Uuid::new_v4();
        db.insert_medication(&MedicationRow {
            id: med_id,
            user_id,
            name: "Amoxicillin".into(),
            description: None,
            start_at: at("2024-01-01 08:00"),
            interval_hours: 8,
            is_recurring: recurring,
            duration_days: if recurring { None } else { Some(7) },
            total_quantity: 21.0,
            remaining_quantity: 21.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        })
        .unwrap();

        (user_id, med_id)
    }

    fn batch(med_id: Uuid, times: &[&str]) -> Vec<NewReminder> {
        times
            .iter()
            .map(|t| NewReminder {
                id: Uuid::new_v4(),
                medication_id: med_id,
                scheduled_for: at(t),
            })
            .collect()
    }

    #[test]
    fn create_reminders_skips_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let (_, med_id) = seed(&db, true);

        let first = db
            .create_reminders(&batch(med_id, &["2024-01-01 08:00", "2024-01-01 16:00"]), now())
            .unwrap();
        let second = db
            .create_reminders(&batch(med_id, &["2024-01-01 16:00", "2024-01-02 00:00"]), now())
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert_eq!(db.reminders_for_medication(med_id).unwrap().len(), 3);
    }

    #[test]
    fn due_window_is_inclusive() {
        let db = Database::open_in_memory().unwrap();
        let (user_id, med_id) = seed(&db, false);
        db.create_reminders(
            &batch(med_id, &["2024-01-01 13:30", "2024-01-01 14:05", "2024-01-01 14:06"]),
            now(),
        )
        .unwrap();

        let due = db
            .find_due_reminders(user_id, at("2024-01-01 13:30"), at("2024-01-01 14:05"))
            .unwrap();
        let times: Vec<_> = due.iter().map(|d| d.reminder.scheduled_for).collect();
        assert_eq!(times, vec![at("2024-01-01 13:30"), at("2024-01-01 14:05")]);
        assert_eq!(due[0].medication.name, "Amoxicillin");
    }

    #[test]
    fn claim_succeeds_once() {
        let db = Database::open_in_memory().unwrap();
        let (_, med_id) = seed(&db, false);
        let reminders = batch(med_id, &["2024-01-01 14:00"]);
        db.create_reminders(&reminders, now()).unwrap();

        assert!(db.claim_for_notification(reminders[0].id, now()).unwrap());
        assert!(!db.claim_for_notification(reminders[0].id, now()).unwrap());
        assert!(db.get_reminder(reminders[0].id).unwrap().unwrap().notified);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let (_, med_id) = seed(&db, false);

        let result: Result<()> = db.with_tx(|conn| {
            update_medication_stock(conn, med_id, -5.0)?;
            anyhow::bail!("boom")
        });

        assert!(result.is_err());
        let med = db.get_medication(med_id).unwrap().unwrap();
        assert_eq!(med.remaining_quantity, 21.0);
    }

    #[test]
    fn history_insert_is_idempotent_per_reminder() {
        let db = Database::open_in_memory().unwrap();
        let (_, med_id) = seed(&db, false);
        let reminder_id = Uuid::new_v4();
        let log = NewMedicationLog {
            medication_id: med_id,
            reminder_id: Some(reminder_id),
            scheduled_for: Some(at("2024-01-01 08:00")),
            taken_at: None,
            skipped: true,
            skipped_reason: Some("expired".into()),
            notes: "test".into(),
        };

        assert_eq!(db.move_to_history(&[log.clone()], now()).unwrap(), 1);
        assert_eq!(db.move_to_history(&[log], now()).unwrap(), 0);

        let cutoff = now() + Duration::seconds(1);
        assert_eq!(db.delete_history_older_than(cutoff).unwrap(), 1);
    }

    #[test]
    fn clear_push_token_reports_change() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        let mut user = UserRow::new(user_id, "bia", None, now());
        user.push_token = Some("tok".into());
        db.insert_user(&user).unwrap();

        assert!(db.clear_push_token(user_id).unwrap());
        assert!(!db.clear_push_token(user_id).unwrap());
        assert!(db.get_user(user_id).unwrap().unwrap().push_token.is_none());
    }
}
