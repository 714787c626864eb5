use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::warn;

/// What to do when taking a dose would drive stock below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StockPolicy {
    /// Apply the delta as-is and log a warning.
    #[default]
    Allow,
    /// Floor remaining stock at zero.
    Clamp,
}

impl FromStr for StockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "clamp" => Ok(Self::Clamp),
            other => Err(format!("unknown stock policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub check_interval: Duration,
    pub past_tolerance_minutes: i64,
    pub lookahead_minutes: i64,
    pub cleanup_interval: Duration,
    pub retention_days: i64,
    pub history_retention_days: i64,
    pub low_stock_threshold: f64,
    pub min_horizon_days: i64,
    pub reactive_horizon_days: i64,
    pub initial_horizon_days: i64,
    pub channel_timeout: Duration,
    pub max_concurrent_users: usize,
    pub stock_policy: StockPolicy,
    pub default_timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            past_tolerance_minutes: 30,
            lookahead_minutes: 5,
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            retention_days: 30,
            history_retention_days: 90,
            low_stock_threshold: 5.0,
            min_horizon_days: 5,
            reactive_horizon_days: 7,
            initial_horizon_days: 30,
            channel_timeout: Duration::from_secs(10),
            max_concurrent_users: 16,
            stock_policy: StockPolicy::Allow,
            default_timezone: chrono_tz::America::Sao_Paulo,
        }
    }
}

impl EngineConfig {
    /// Read `MEDTIME_*` variables. Missing or unparsable values keep their default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            check_interval: minutes(env_or("MEDTIME_CHECK_INTERVAL_MINUTES", 1u64)),
            past_tolerance_minutes: env_or("MEDTIME_PAST_TOLERANCE_MINUTES", d.past_tolerance_minutes),
            lookahead_minutes: env_or("MEDTIME_LOOKAHEAD_MINUTES", d.lookahead_minutes),
            cleanup_interval: minutes(env_or("MEDTIME_CLEANUP_INTERVAL_MINUTES", 1440u64)),
            retention_days: env_or("MEDTIME_RETENTION_DAYS", d.retention_days),
            history_retention_days: env_or("MEDTIME_HISTORY_RETENTION_DAYS", d.history_retention_days),
            low_stock_threshold: env_or("MEDTIME_LOW_STOCK_THRESHOLD", d.low_stock_threshold),
            min_horizon_days: env_or("MEDTIME_MIN_HORIZON_DAYS", d.min_horizon_days),
            reactive_horizon_days: env_or("MEDTIME_REACTIVE_HORIZON_DAYS", d.reactive_horizon_days),
            initial_horizon_days: env_or("MEDTIME_INITIAL_HORIZON_DAYS", d.initial_horizon_days),
            channel_timeout: Duration::from_secs(env_or("MEDTIME_CHANNEL_TIMEOUT_SECS", 10u64)),
            max_concurrent_users: env_or("MEDTIME_MAX_CONCURRENT_USERS", d.max_concurrent_users)
                .max(1),
            stock_policy: env_or("MEDTIME_STOCK_POLICY", d.stock_policy),
            default_timezone: env_or("MEDTIME_DEFAULT_TIMEZONE", d.default_timezone),
        }
    }

    pub fn past_tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.past_tolerance_minutes)
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookahead_minutes)
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.max(1) * 60)
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {}={:?} ({}), using default {}", key, raw, e, default);
            default
        }
    }
}

impl std::fmt::Display for StockPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Clamp => f.write_str("clamp"),
        }
    }
}
