use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::debug;

use medtime_db::Database;
use medtime_db::models::MedicationRow;

use crate::error::Result;
use crate::schedule;

/// Keep at least `min_days_ahead` days of pending reminders for a recurring
/// medication. Returns the number of reminders inserted.
///
/// New reminders continue the phase of the last existing one (or `start_at`),
/// never land before `now_local`, and never replace existing rows.
pub fn ensure_horizon(
    db: &Database,
    medication: &MedicationRow,
    min_days_ahead: i64,
    now_local: NaiveDateTime,
    now_utc: DateTime<Utc>,
) -> Result<usize> {
    if !medication.is_recurring || min_days_ahead <= 0 {
        return Ok(0);
    }

    let interval = medication.interval_hours;
    let expected = (min_days_ahead * 24 + interval - 1) / interval.max(1);
    let pending = db.count_pending_from(medication.id, now_local)?;
    if pending >= expected {
        return Ok(0);
    }

    let last = db.last_scheduled_for(medication.id)?;
    let anchor = last.unwrap_or(medication.start_at);
    let mut from = schedule::first_on_or_after(anchor, interval, now_local)?;
    if let Some(last) = last {
        from = from.max(last + Duration::hours(interval));
    }

    let until = now_local + Duration::days(min_days_ahead);
    let instants = schedule::generate(from, interval, until)?;
    if instants.is_empty() {
        return Ok(0);
    }

    let inserted = db.create_reminders(&schedule::materialize(medication.id, &instants), now_utc)?;
    debug!(
        medication_id = %medication.id,
        pending,
        expected,
        inserted,
        "Extended reminder horizon"
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use medtime_db::models::UserRow;
    use medtime_types::models::Unit;
    use uuid::Uuid;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn recurring(db: &Database, start_at: NaiveDateTime, interval_hours: i64) -> MedicationRow {
        let user_id = Uuid::new_v4();
        db.insert_user(&UserRow::new(user_id, &format!("u{}", user_id.simple()), None, stamp()))
            .unwrap();
        let med = MedicationRow {
            id: Uuid::new_v4(),
            user_id,
            name: "Metformin".into(),
            description: None,
            start_at,
            interval_hours,
            is_recurring: true,
            duration_days: None,
            total_quantity: 60.0,
            remaining_quantity: 60.0,
            unit: Unit::Tablets,
            dosage_quantity: 1.0,
        };
        db.insert_medication(&med).unwrap();
        med
    }

    #[test]
    fn fills_five_days_for_eight_hour_interval() {
        let db = Database::open_in_memory().unwrap();
        let now = at("2024-01-10 09:00");
        let med = recurring(&db, now - Duration::days(5), 8);

        let inserted = ensure_horizon(&db, &med, 5, now, stamp()).unwrap();

        assert_eq!(inserted, 15);
        let rows = db.reminders_for_medication(med.id).unwrap();
        assert!(rows.iter().all(|r| r.scheduled_for >= now));
        assert!(rows.iter().all(|r| r.scheduled_for < now + Duration::days(5)));
        assert!(
            rows.iter()
                .all(|r| (r.scheduled_for - med.start_at).num_hours() % 8 == 0)
        );
    }

    #[test]
    fn new_eight_hour_medication_gets_five_days_from_its_start() {
        let db = Database::open_in_memory().unwrap();
        let start = at("2024-01-01 08:00");
        let med = recurring(&db, start, 8);

        let inserted = ensure_horizon(&db, &med, 5, start, stamp()).unwrap();

        assert_eq!(inserted, 15);
        let times: Vec<_> = db
            .reminders_for_medication(med.id)
            .unwrap()
            .into_iter()
            .map(|r| r.scheduled_for)
            .collect();
        assert_eq!(
            &times[..3],
            &[at("2024-01-01 08:00"), at("2024-01-01 16:00"), at("2024-01-02 00:00")]
        );
        assert_eq!(times.last(), Some(&at("2024-01-06 00:00")));
    }

    #[test]
    fn second_call_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let now = at("2024-01-10 09:00");
        let med = recurring(&db, at("2024-01-01 08:00"), 12);

        assert_eq!(ensure_horizon(&db, &med, 5, now, stamp()).unwrap(), 10);
        assert_eq!(ensure_horizon(&db, &med, 5, now, stamp()).unwrap(), 0);
    }

    #[test]
    fn continues_after_last_reminder_without_gaps() {
        let db = Database::open_in_memory().unwrap();
        let med = recurring(&db, at("2024-01-01 08:00"), 24);
        db.create_reminders(
            &schedule::materialize(med.id, &[at("2024-01-10 08:00"), at("2024-01-11 08:00")]),
            stamp(),
        )
        .unwrap();

        let now = at("2024-01-10 07:00");
        let inserted = ensure_horizon(&db, &med, 5, now, stamp()).unwrap();

        let times: Vec<_> = db
            .reminders_for_medication(med.id)
            .unwrap()
            .into_iter()
            .map(|r| r.scheduled_for)
            .collect();
        assert_eq!(inserted, 3);
        assert_eq!(times.len(), 5);
        assert_eq!(times.last(), Some(&at("2024-01-14 08:00")));
    }

    #[test]
    fn ignores_finite_medications() {
        let db = Database::open_in_memory().unwrap();
        let mut med = recurring(&db, at("2024-01-01 08:00"), 8);
        med.is_recurring = false;

        assert_eq!(ensure_horizon(&db, &med, 5, at("2024-01-02 00:00"), stamp()).unwrap(), 0);
    }
}
