// algolab_core/src/utils.rs

//! Helpers for parsing user-supplied dates, timestamps and rates.

use anyhow::Context;

/// Date formats accepted in settings and prompts.
const DATE_FORMATS: [&str; 2] = ["%Y%m%d", "%Y-%m-%d"];

/// Parses a calendar date given as `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_date(string: &str) -> anyhow::Result<chrono::NaiveDate> {
    let trimmed = string.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| chrono::NaiveDate::parse_from_str(trimmed, format).ok())
        .with_context(|| format!("Invalid date '{}', expected YYYYMMDD or YYYY-MM-DD", trimmed))
}

/// Converts a string representation of a date and time into a `chrono::DateTime<chrono::Utc>`.
///
/// # Arguments
/// * `string` - The date-time string to parse (e.g., "2025-07-08 15:30:00").
/// * `format` - The expected format of the input string (e.g., "%Y-%m-%d %H:%M:%S").
pub fn string_to_date_time(string: &str, format: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let dt = chrono::NaiveDateTime::parse_from_str(string, format)
        .with_context(|| format!("Invalid format '{}' for '{}'", format, string))?;

    anyhow::Ok(chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc))
}

/// Parses a bar timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare date (midnight UTC).
pub fn parse_timestamp(string: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let trimmed = string.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return anyhow::Ok(dt.with_timezone(&chrono::Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = string_to_date_time(trimmed, format) {
            return anyhow::Ok(dt);
        }
    }

    let date = parse_date(trimmed).with_context(|| format!("Invalid timestamp '{}'", trimmed))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid timestamp '{}'", trimmed))?;
    anyhow::Ok(chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(midnight, chrono::Utc))
}

/// Parses a commission rate. A trailing `%` divides by 100 (`"0.1%"` is `0.001`).
pub fn parse_commission(string: &str) -> anyhow::Result<f64> {
    let trimmed = string.trim();
    let (number, scale) = match trimmed.strip_suffix('%') {
        Some(number) => (number.trim(), 100.0),
        None => (trimmed, 1.0),
    };

    let value: f64 = number
        .parse()
        .with_context(|| format!("Invalid commission '{}'", trimmed))?;
    let rate = value / scale;

    if !(0.0..1.0).contains(&rate) {
        anyhow::bail!("Commission must be in [0, 1), got {}", rate);
    }

    anyhow::Ok(rate)
}
