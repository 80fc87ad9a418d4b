//! Wall-clock access.
//!
//! Write paths are rendered from the current date, and the arming plan logs
//! the moment the detector was armed. Both go through [`Clock`] so tests can
//! pin the date.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::fmt::Debug;

/// Timestamp format used in log lines (`2024-01-01 12:00:00.000000`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Source of the current local time.
pub trait Clock: Send + Sync + Debug {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;
}

/// The host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Local>);

impl FixedClock {
    /// Clock that always reports `at`.
    pub fn new(at: DateTime<Local>) -> Self {
        Self(at)
    }

    /// Noon local time on the given date, or `None` if the date is invalid.
    pub fn at_date(year: i32, month: u32, day: u32) -> Option<Self> {
        let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(12, 0, 0)?;
        Local.from_local_datetime(&naive).single().map(Self)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Format an instant the way log lines and plan output expect.
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time as a log-friendly string.
pub fn now_string() -> String {
    format_timestamp(&Local::now())
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn unix_timestamp(at: &DateTime<Local>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) * 1e-9
}
