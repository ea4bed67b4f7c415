//! The wire timestamp format: `YYYY-MM-DD HH:mm:ss:SSS` in local time.
//!
//! Timestamps are diagnostic only. They feed heartbeat round-trip
//! bookkeeping and logs, never ordering decisions.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use regex::Regex;

use crate::errors::TimeFormatError;

/// `chrono` format string producing the wire layout.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%3f";

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2}):(\d{3})$").expect("valid regex")
});

/// Format an instant in the wire layout.
pub fn format_time(at: DateTime<Local>) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// The current local time in the wire layout.
pub fn now_string() -> String {
    format_time(Local::now())
}

/// Whether `s` has the exact fixed-width shape.
pub fn is_valid_time(s: &str) -> bool {
    TIME_PATTERN.is_match(s)
}

/// Parse a wire timestamp back into a local instant.
pub fn parse_time(s: &str) -> Result<DateTime<Local>, TimeFormatError> {
    let caps = TIME_PATTERN
        .captures(s)
        .ok_or_else(|| TimeFormatError::Pattern(s.to_owned()))?;
    let field = |i: usize| -> u32 { caps[i].parse().unwrap_or(u32::MAX) };
    let out_of_range = || TimeFormatError::OutOfRange(s.to_owned());

    let year = i32::try_from(field(1)).map_err(|_| out_of_range())?;
    let naive = NaiveDate::from_ymd_opt(year, field(2), field(3))
        .and_then(|d| d.and_hms_milli_opt(field(4), field(5), field(6), field(7)))
        .ok_or_else(out_of_range)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(out_of_range)
}

/// Signed milliseconds from `start` to `end`.
pub fn millis_between(start: DateTime<Local>, end: DateTime<Local>) -> i64 {
    (end - start).num_milliseconds()
}
