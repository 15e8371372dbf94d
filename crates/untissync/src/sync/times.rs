//! Conversion of WebUntis date/time integers.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

/// Parses a `yyyymmdd` integer.
pub fn parse_date(value: u32) -> Option<NaiveDate> {
    let year = (value / 10_000) as i32;
    let month = (value / 100) % 100;
    let day = value % 100;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Formats a date back into WebUntis' `yyyymmdd` form.
pub fn format_date(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Parses an `hhmm` integer (e.g. `745` for 07:45).
pub fn parse_time(value: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(value / 100, value % 100, 0)
}

pub fn weekday(date: NaiveDate) -> Weekday {
    date.weekday()
}

/// Minutes between `start` and `end`; 0 if `end` is not after `start`.
pub fn duration_minutes(start: NaiveTime, end: NaiveTime) -> u32 {
    let minutes = (end - start).num_minutes();
    u32::try_from(minutes).unwrap_or(0)
}
