//! Column conversions shared by the repositories.

use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

/// Storage format for calendar-day keys (`2024-05-01`).
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Step counts are `u64` in memory and `INTEGER` (i64) on disk.
pub fn to_i64(steps: u64) -> Result<i64> {
    i64::try_from(steps).map_err(|_| anyhow!("step count {steps} does not fit in SQLite"))
}

pub fn to_u64(stored: i64, column: &str) -> Result<u64> {
    u64::try_from(stored).map_err(|_| anyhow!("column {column} holds negative value {stored}"))
}

pub fn parse_datetime(value: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("column {column} is not RFC 3339: '{value}'"))?
        .with_timezone(&Utc))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value
        .as_deref()
        .map(|raw| parse_datetime(raw, column))
        .transpose()
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date(value: &str, column: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_KEY_FORMAT)
        .with_context(|| format!("column {column} is not a date: '{value}'"))
}
