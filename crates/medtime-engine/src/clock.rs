use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use medtime_db::models::UserRow;

/// Source of the current instant. Injected everywhere so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Parse an IANA zone name, falling back to `default` when missing or unknown.
pub fn resolve_timezone(name: Option<&str>, default: Tz) -> Tz {
    match name {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Unknown timezone {:?}, using {}", raw, default);
            default
        }),
        _ => default,
    }
}

/// Wall-clock time in `user`'s timezone.
pub fn user_now(now: DateTime<Utc>, user: &UserRow, default: Tz) -> NaiveDateTime {
    let tz = resolve_timezone(user.timezone.as_deref(), default);
    now.with_timezone(&tz).naive_local()
}
