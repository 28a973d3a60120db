use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A daily trigger time (`HH:MM`). Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleTime {
    hour: u32,
    minute: u32,
}

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, String> {
        if hour > 23 {
            return Err(format!("hour must be between 0 and 23, got {}", hour));
        }
        if minute > 59 {
            return Err(format!("minute must be between 0 and 59, got {}", minute));
        }
        Ok(Self { hour, minute })
    }

    /// Parses `"HH:MM"`: exactly two ASCII digits on each side of the colon.
    pub fn parse(value: &str) -> Result<Self, String> {
        let (h, m) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid schedule time '{}', expected HH:MM", value))?;

        let hour = two_digits(h).ok_or_else(|| format!("invalid hour in schedule time '{}'", value))?;
        let minute = two_digits(m).ok_or_else(|| format!("invalid minute in schedule time '{}'", value))?;

        Self::new(hour, minute)
    }

    /// Parses a comma-separated list, returning it sorted and de-duplicated.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, String> {
        let mut times = value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect::<Result<Vec<_>, _>>()?;
        times.sort();
        times.dedup();
        Ok(times)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// True when `time` falls inside this minute.
    pub fn matches<T: Timelike>(&self, time: &T) -> bool {
        time.hour() == self.hour && time.minute() == self.minute
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for ScheduleTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

fn two_digits(part: &str) -> Option<u32> {
    match part.as_bytes() {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => Some(u32::from(a - b'0') * 10 + u32::from(b - b'0')),
        _ => None,
    }
}
