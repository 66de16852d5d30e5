// ===============================
// src/time.rs
// ===============================
//
// Simulated time. Everything in the engine runs on SimTime (nanoseconds
// since an arbitrary epoch) and SimDuration; nothing here touches the wall
// clock. Human-written latency configs use the literal grammar
// `<integer>(ns|us|micros|ms|millis|s|sec)`, with bare "0" meaning 0 ns.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid timestamp string: {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid duration string: {0:?}")]
    InvalidDuration(String),
}

/// Nanosecond offset from the simulation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub i64);

/// Nanosecond span between two SimTimes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimDuration(pub i64);

impl SimTime {
    pub const MIN: SimTime = SimTime(i64::MIN);
}

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    pub const fn nanos(n: i64) -> Self {
        SimDuration(n)
    }
    pub const fn micros(n: i64) -> Self {
        SimDuration(n * 1_000)
    }
    pub const fn millis(n: i64) -> Self {
        SimDuration(n * 1_000_000)
    }
    pub const fn secs(n: i64) -> Self {
        SimDuration(n * 1_000_000_000)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<SimDuration> for SimTime {
    fn add_assign(&mut self, rhs: SimDuration) {
        *self = *self + rhs;
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;
    fn sub(self, rhs: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(rhs.0))
    }
}

impl Add<SimDuration> for SimDuration {
    type Output = SimDuration;
    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Parse a decimal-nanoseconds epoch timestamp, e.g. "1678886400000000000".
pub fn parse_timestamp(s: &str) -> Result<SimTime, ParseError> {
    s.trim()
        .parse::<i64>()
        .map(SimTime)
        .map_err(|_| ParseError::InvalidTimestamp(s.to_string()))
}

/// Parse a duration literal, e.g. "50us", "20ms", "2s", "0".
pub fn parse_duration(s: &str) -> Result<SimDuration, ParseError> {
    let lower = s.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Ok(SimDuration::ZERO);
    }

    let digits_end = lower
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
        .count();
    let (value_str, unit) = lower.split_at(digits_end);
    let value: i64 = value_str
        .parse()
        .map_err(|_| ParseError::InvalidDuration(s.to_string()))?;

    match unit {
        "ns" => Ok(SimDuration::nanos(value)),
        "us" | "micros" => Ok(SimDuration::micros(value)),
        "ms" | "millis" => Ok(SimDuration::millis(value)),
        "s" | "sec" => Ok(SimDuration::secs(value)),
        // bare "0" means 0ns; any other bare number is ambiguous
        "" if value == 0 => Ok(SimDuration::ZERO),
        _ => Err(ParseError::InvalidDuration(s.to_string())),
    }
}
