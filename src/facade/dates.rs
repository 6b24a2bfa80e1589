use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};

use crate::app::{DigestError, Result};

/// Parse a relative or absolute date string against the local clock.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    parse_date_at(input, Local::now())
}

/// Accepts `today`, `yesterday`, `week`, `month`, `YYYY-MM-DD` (UTC midnight)
/// or an RFC 3339 timestamp. Relative forms resolve against `now`.
pub fn parse_date_at<Tz: TimeZone>(input: &str, now: DateTime<Tz>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "today" => return Ok(start_of_day(&now)),
        "yesterday" => return Ok(start_of_day(&now) - Duration::hours(24)),
        "week" => return Ok(now.with_timezone(&Utc) - Duration::days(7)),
        "month" => return Ok(now.with_timezone(&Utc) - Duration::days(30)),
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DigestError::InvalidDate(input.to_string()))
}

/// Midnight of `now`'s calendar day in its own time zone.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let tz = now.timezone();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        // Midnight skipped by a DST jump: fall back to the UTC day.
        .unwrap_or_else(|| {
            let day = now.with_timezone(&Utc).date_naive();
            Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
        })
}
