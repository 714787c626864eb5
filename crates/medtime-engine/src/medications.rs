use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::info;
use uuid::Uuid;

use medtime_db::Database;
use medtime_db::models::MedicationRow;
use medtime_db::queries;
use medtime_types::models::Unit;

use crate::error::{EngineError, Result};
use crate::schedule;

/// Longest finite course accepted at intake.
pub const MAX_DURATION_DAYS: i64 = 3650;
/// Widest dosing interval accepted at intake (one dose a year).
pub const MAX_INTERVAL_HOURS: i64 = 24 * 365;

/// Intake request for a new medication.
#[derive(Debug, Clone)]
pub struct NewMedication {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// First dose, owner-local wall-clock time
    pub start_at: NaiveDateTime,
    pub interval_hours: i64,
    pub is_recurring: bool,
    pub duration_days: Option<i64>,
    pub total_quantity: f64,
    /// Defaults to `total_quantity`
    pub remaining_quantity: Option<f64>,
    pub unit: Unit,
    pub dosage_quantity: f64,
}

impl NewMedication {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().chars().count() < 2 {
            return Err(EngineError::Validation("name must have at least 2 characters".into()));
        }
        if self.interval_hours <= 0 {
            return Err(EngineError::Validation("interval must be positive".into()));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(EngineError::Validation(format!(
                "interval must be at most {MAX_INTERVAL_HOURS} hours"
            )));
        }
        if self.dosage_quantity.is_nan() || self.dosage_quantity <= 0.0 {
            return Err(EngineError::Validation("dosage must be positive".into()));
        }
        if self.total_quantity.is_nan() || self.total_quantity <= 0.0 {
            return Err(EngineError::Validation("total quantity must be positive".into()));
        }
        match (self.is_recurring, self.duration_days) {
            (true, Some(_)) => Err(EngineError::Validation(
                "recurring medications have no duration".into(),
            )),
            (false, None) => Err(EngineError::Validation(
                "a duration is required unless the medication is recurring".into(),
            )),
            (false, Some(days)) if days <= 0 => {
                Err(EngineError::Validation("duration must be positive".into()))
            }
            (false, Some(days)) if days > MAX_DURATION_DAYS => Err(EngineError::Validation(
                format!("duration must be at most {MAX_DURATION_DAYS} days"),
            )),
            _ => Ok(()),
        }
    }
}

/// Validate, store and schedule a medication. Returns the stored row and the
/// number of reminders created for it.
pub fn create_medication(
    db: &Database,
    new: NewMedication,
    now_local: NaiveDateTime,
    now_utc: DateTime<Utc>,
    initial_horizon_days: i64,
) -> Result<(MedicationRow, usize)> {
    new.validate()?;

    let name = new.name.trim().to_string();
    if db
        .find_duplicate_medication(
            new.user_id,
            &name,
            new.start_at,
            new.interval_hours,
            new.duration_days,
        )?
        .is_some()
    {
        return Err(EngineError::DuplicateMedication);
    }

    let horizon_end = match new.duration_days {
        Some(days) if !new.is_recurring => days_after(new.start_at, days),
        _ => days_after(new.start_at.max(now_local), initial_horizon_days),
    }
    .ok_or_else(|| EngineError::Validation("schedule ends outside the supported date range".into()))?;
    let instants = schedule::generate(new.start_at, new.interval_hours, horizon_end)?;

    let medication = MedicationRow {
        id: Uuid::new_v4(),
        user_id: new.user_id,
        name,
        description: new.description.filter(|d| !d.trim().is_empty()),
        start_at: new.start_at,
        interval_hours: new.interval_hours,
        is_recurring: new.is_recurring,
        duration_days: new.duration_days,
        total_quantity: new.total_quantity,
        remaining_quantity: new.remaining_quantity.unwrap_or(new.total_quantity),
        unit: new.unit,
        dosage_quantity: new.dosage_quantity,
    };
    let batch = schedule::materialize(medication.id, &instants);

    let created = db.with_tx(|conn| {
        queries::insert_medication(conn, &medication)?;
        queries::create_reminders(conn, &batch, now_utc)
    })?;

    info!(
        medication_id = %medication.id,
        user_id = %medication.user_id,
        reminders = created,
        "Medication created"
    );
    Ok((medication, created))
}

fn days_after(t: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    t.checked_add_signed(Duration::try_days(days)?)
}
