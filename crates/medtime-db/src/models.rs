//! Database row types. These map directly to SQLite rows.
//! Distinct from medtime-types API models to keep the DB layer independent.
//!
//! Two time representations are stored:
//! - wall-clock times (`start_at`, `scheduled_for`) are naive and always
//!   interpreted in the owning user's timezone;
//! - instants (`taken_at`, `created_at`, ...) are UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use medtime_types::models::Unit;
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

pub const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub timezone: Option<String>,
    pub push_token: Option<String>,
    pub socket_enabled: bool,
    pub whatsapp_enabled: bool,
    pub whatsapp_number: Option<String>,
    pub telegram_enabled: bool,
    pub telegram_chat_id: Option<String>,
    pub desktop_sync_enabled: bool,
    pub desktop_sync_enabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// A user with only the realtime socket channel enabled.
    pub fn new(id: Uuid, username: &str, timezone: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_string(),
            timezone: timezone.map(str::to_string),
            push_token: None,
            socket_enabled: true,
            whatsapp_enabled: false,
            whatsapp_number: None,
            telegram_enabled: false,
            telegram_chat_id: None,
            desktop_sync_enabled: false,
            desktop_sync_enabled_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MedicationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_at: NaiveDateTime,
    pub interval_hours: i64,
    pub is_recurring: bool,
    pub duration_days: Option<i64>,
    pub total_quantity: f64,
    pub remaining_quantity: f64,
    pub unit: Unit,
    pub dosage_quantity: f64,
}

#[derive(Debug, Clone)]
pub struct ReminderRow {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_for: NaiveDateTime,
    pub taken: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub skipped_reason: Option<String>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderRow {
    pub fn is_pending(&self) -> bool {
        !self.taken && !self.skipped
    }
}

/// A reminder joined with the medication it belongs to.
#[derive(Debug, Clone)]
pub struct DueReminder {
    pub reminder: ReminderRow,
    pub medication: MedicationRow,
}

/// Candidate reminder for a skip-duplicates bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReminder {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_for: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMedicationLog {
    pub medication_id: Uuid,
    pub reminder_id: Option<Uuid>,
    pub scheduled_for: Option<NaiveDateTime>,
    pub taken_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub skipped_reason: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct MedicationLogRow {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub reminder_id: Option<Uuid>,
    pub scheduled_for: Option<NaiveDateTime>,
    pub taken_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub skipped_reason: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

// -- Column encoding --

pub fn fmt_local(t: NaiveDateTime) -> String {
    t.format(LOCAL_FORMAT).to_string()
}

pub fn fmt_utc(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn col_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn col_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn col_local(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_local(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn col_opt_local(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_local(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn col_utc(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_utc(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn col_opt_utc(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_utc(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn col_unit(row: &Row<'_>, idx: usize) -> rusqlite::Result<Unit> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_local(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, LOCAL_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    raw.parse::<DateTime<Utc>>().or_else(|_| {
        // SQLite's datetime('now') has no offset; treat it as UTC.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_format_sorts_chronologically() {
        let a = NaiveDateTime::parse_from_str("2024-01-09 23:00:00", LOCAL_FORMAT).unwrap();
        let b = NaiveDateTime::parse_from_str("2024-01-10 01:00:00", LOCAL_FORMAT).unwrap();
        assert!(fmt_local(a) < fmt_local(b));
    }

    #[test]
    fn utc_accepts_sqlite_default_format() {
        let t = parse_utc("2024-03-01 12:30:00").unwrap();
        assert_eq!(fmt_utc(t), "2024-03-01T12:30:00Z");
    }
}
