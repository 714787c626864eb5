use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unit a medication's quantities are counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Tablets,
    Ml,
    Drops,
    Doses,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Tablets => "tablets",
            Unit::Ml => "ml",
            Unit::Drops => "drops",
            Unit::Doses => "doses",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl fmt::Display for UnknownUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown unit '{}'", self.0)
    }
}

impl std::error::Error for UnknownUnit {}

impl FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tablets" | "tablet" => Ok(Unit::Tablets),
            "ml" => Ok(Unit::Ml),
            "drops" | "drop" => Ok(Unit::Drops),
            "doses" | "dose" => Ok(Unit::Doses),
            other => Err(UnknownUnit(other.to_string())),
        }
    }
}

/// Dosing interval presets offered by the clients ("8/8" = every 8 hours).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalPreset {
    #[serde(rename = "6/6")]
    Every6,
    #[serde(rename = "8/8")]
    Every8,
    #[serde(rename = "12/12")]
    Every12,
    #[serde(rename = "24/24")]
    Every24,
}

impl IntervalPreset {
    pub fn hours(&self) -> i64 {
        match self {
            IntervalPreset::Every6 => 6,
            IntervalPreset::Every8 => 8,
            IntervalPreset::Every12 => 12,
            IntervalPreset::Every24 => 24,
        }
    }

    /// Doses per day for this preset.
    pub fn daily_doses(&self) -> i64 {
        24 / self.hours()
    }
}

/// Delivery mechanisms a reminder can be fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Push,
    Socket,
    WhatsApp,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Push => "push",
            ChannelKind::Socket => "socket",
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
