//! Human-readable schedule intervals.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A validated recurring interval written as `"<hours>:<minutes>"`.
///
/// `"12:00"` is twelve hours, `"0:30"` is thirty minutes. Zero-length
/// intervals and minute components of 60 or more are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleInterval {
    hours: u32,
    minutes: u32,
}

impl ScheduleInterval {
    /// Parse an interval string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidInterval {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("interval is empty"));
        }

        let (hours, minutes) = trimmed
            .split_once(':')
            .ok_or_else(|| invalid("expected <hours>:<minutes>"))?;

        let hours: u32 = hours
            .trim()
            .parse()
            .map_err(|_| invalid("hours must be a non-negative integer"))?;
        let minutes: u32 = minutes
            .trim()
            .parse()
            .map_err(|_| invalid("minutes must be a non-negative integer"))?;

        if minutes >= 60 {
            return Err(invalid("minutes must be below 60"));
        }
        if hours == 0 && minutes == 0 {
            return Err(invalid("interval must be greater than zero"));
        }

        Ok(Self { hours, minutes })
    }

    /// The interval as a duration.
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60)
    }

    /// The interval in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.period().as_millis() as u64
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hours, self.minutes)
    }
}

impl FromStr for ScheduleInterval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ScheduleInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
