//! Bar resolution, written the way it appears in partition paths (`1m`, `1h`, `1d`, ...).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeframeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeframeUnit {
    fn suffix(self) -> &'static str {
        match self {
            TimeframeUnit::Minute => "m",
            TimeframeUnit::Hour => "h",
            TimeframeUnit::Day => "d",
            TimeframeUnit::Week => "w",
            TimeframeUnit::Month => "mo",
        }
    }
}

/// A bar resolution: `amount` units per bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe {
    pub amount: u32,
    pub unit: TimeframeUnit,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid timeframe '{0}' (expected e.g. 1m, 15m, 1h, 1d, 1w, 1mo)")]
pub struct TimeframeParseError(pub String);

impl Timeframe {
    pub const fn new(amount: u32, unit: TimeframeUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn minutes(amount: u32) -> Self {
        Self::new(amount, TimeframeUnit::Minute)
    }

    pub const fn daily() -> Self {
        Self::new(1, TimeframeUnit::Day)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeframeParseError(s.to_string()))?;
        let (digits, suffix) = trimmed.split_at(split);
        let amount: u32 = digits
            .parse()
            .map_err(|_| TimeframeParseError(s.to_string()))?;
        if amount == 0 {
            return Err(TimeframeParseError(s.to_string()));
        }
        let unit = match suffix {
            "m" | "min" => TimeframeUnit::Minute,
            "h" => TimeframeUnit::Hour,
            "d" => TimeframeUnit::Day,
            "w" => TimeframeUnit::Week,
            "mo" => TimeframeUnit::Month,
            _ => return Err(TimeframeParseError(s.to_string())),
        };
        Ok(Self { amount, unit })
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
