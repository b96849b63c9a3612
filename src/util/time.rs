//! Timestamp parsing and formatting utilities.

use crate::error::{MigrateError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parse a timestamp from user input or a remote payload.
///
/// Supports:
/// - RFC3339: `2025-01-15T12:00:00Z`, `2025-01-15T12:00:00+02:00`
/// - Naive date-time, read as UTC: `2025-01-15T12:00:00`, `2025-01-15 12:00:00`
/// - Simple date, midnight UTC: `2025-01-15`
///
/// # Errors
///
/// Returns a validation error naming `field_name` when no format matches.
pub fn parse_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(MigrateError::validation(
        field_name,
        format!("unrecognized timestamp '{s}'"),
    ))
}

/// Like [`parse_timestamp`] but `None` for absent or unparseable input.
#[must_use]
pub fn parse_optional_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.filter(|v| !v.trim().is_empty())
        .and_then(|v| parse_timestamp(v, "timestamp").ok())
}

/// Short UTC rendering for reports: `2025-01-15T12:00:00Z`.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Date-only rendering used in synthesized policy reasons.
#[must_use]
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}
