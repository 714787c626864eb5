//! Dose time generation.
//!
//! Every instant is a naive wall-clock time in the owner's timezone, so adding
//! N hours keeps the dose at the same time of day regardless of DST changes.

use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use medtime_db::models::NewReminder;

use crate::error::{EngineError, Result};

/// Dose instants from `start_at` (inclusive) to `horizon_end` (exclusive),
/// spaced `interval_hours` apart.
pub fn generate(
    start_at: NaiveDateTime,
    interval_hours: i64,
    horizon_end: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>> {
    let step = step(interval_hours)?;

    let mut out = Vec::new();
    let mut t = start_at;
    while t < horizon_end {
        out.push(t);
        match t.checked_add_signed(step) {
            Some(next) => t = next,
            None => break,
        }
    }
    Ok(out)
}

/// First instant of the `anchor` phase that is `>= t`.
pub fn first_on_or_after(
    anchor: NaiveDateTime,
    interval_hours: i64,
    t: NaiveDateTime,
) -> Result<NaiveDateTime> {
    let step = step(interval_hours)?;
    if t <= anchor {
        return Ok(anchor);
    }

    let elapsed = (t - anchor).num_seconds();
    let period = step.num_seconds();
    let steps = (elapsed + period - 1) / period;
    Ok(anchor + Duration::seconds(steps * period))
}

/// Wrap generated instants as fresh reminder rows for `medication_id`.
pub fn materialize(medication_id: Uuid, instants: &[NaiveDateTime]) -> Vec<NewReminder> {
    instants
        .iter()
        .map(|&scheduled_for| NewReminder {
            id: Uuid::new_v4(),
            medication_id,
            scheduled_for,
        })
        .collect()
}

fn step(interval_hours: i64) -> Result<Duration> {
    if interval_hours <= 0 {
        return Err(EngineError::InvalidSchedule(format!(
            "interval must be positive, got {interval_hours}h"
        )));
    }
    Duration::try_hours(interval_hours).ok_or_else(|| {
        EngineError::InvalidSchedule(format!("interval of {interval_hours}h is out of range"))
    })
}
