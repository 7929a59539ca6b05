//! Timestamp helpers. Every time in a parsed bugreport is a UTC instant:
//! device logs carry no zone, so wall-clock values are taken as-is.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

pub type Timestamp = DateTime<Utc>;

/// Parses "2016-03-18 14:21:47.651" or "2016-03-18 14:21:47".
pub fn parse_timestamp(timestamp: &str) -> Option<Timestamp> {
    let timestamp = timestamp.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S%.3f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }

    None
}

/// The year to assume for log lines that don't carry one.
///
/// Logs are written before the bugreport is taken, so a month later than the
/// reference month means the line was logged in the previous year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceDate {
    pub year: i32,
    pub month: u32,
}

impl ReferenceDate {
    pub fn from_timestamp(time: &Timestamp) -> Self {
        ReferenceDate {
            year: time.year(),
            month: time.month(),
        }
    }

    pub fn year_for(&self, month: u32) -> i32 {
        if month > self.month {
            self.year - 1
        } else {
            self.year
        }
    }
}

impl Default for ReferenceDate {
    /// Without a dumpstate header there is nothing to anchor to; 1970 keeps
    /// re-parses deterministic and never rolls back a year.
    fn default() -> Self {
        ReferenceDate {
            year: 1970,
            month: 12,
        }
    }
}

/// Builds a timestamp from log-line fields, `None` for impossible dates.
pub fn make_timestamp(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> Option<Timestamp> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Longest duration a log line may report. Anything above does not fit a timestamp.
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 86_400;

/// Converts a "123.4" + "ms" style pair into a duration. `None` for values
/// that are not finite or exceed `MAX_DURATION_SECS`.
pub fn parse_duration(value: &str, unit: &str) -> Option<Duration> {
    let value: f64 = value.parse().ok()?;
    let micros = match unit {
        "us" => value,
        "ms" => value * 1_000.0,
        "s" => value * 1_000_000.0,
        _ => return None,
    };
    if !micros.is_finite() || micros.abs() > (MAX_DURATION_SECS as f64) * 1_000_000.0 {
        return None;
    }
    Some(Duration::microseconds(micros.round() as i64))
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.num_milliseconds();
    let seconds = duration.num_seconds();

    if seconds < 1 {
        format!("{}ms", millis)
    } else if seconds < 60 {
        format!("{}.{:03}s", seconds, millis % 1000)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// "2016-03-18 14:21:47.651"
pub fn format_timestamp(time: &Timestamp) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let with_millis = parse_timestamp("2016-03-18 14:21:47.651").unwrap();
        assert_eq!(format_timestamp(&with_millis), "2016-03-18 14:21:47.651");

        let without = parse_timestamp("2016-03-18 14:21:47").unwrap();
        assert_eq!(format_timestamp(&without), "2016-03-18 14:21:47.000");

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_reference_year_rolls_back() {
        let reference = ReferenceDate { year: 2016, month: 1 };
        assert_eq!(reference.year_for(1), 2016);
        assert_eq!(reference.year_for(12), 2015);
    }

    #[test]
    fn test_make_timestamp_rejects_bad_dates() {
        assert!(make_timestamp(2016, 2, 30, 0, 0, 0, 0).is_none());
        assert!(make_timestamp(2016, 2, 29, 23, 59, 59, 999).is_some());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("63", "us"), Some(Duration::microseconds(63)));
        assert_eq!(parse_duration("120.5", "ms"), Some(Duration::microseconds(120_500)));
        assert_eq!(parse_duration("1.2", "s"), Some(Duration::milliseconds(1200)));
        assert_eq!(parse_duration("1", "min"), None);
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert_eq!(parse_duration("99999999999999999999", "ms"), None);
        assert_eq!(parse_duration("1e300", "s"), None);
        assert_eq!(parse_duration("inf", "us"), None);
        assert_eq!(parse_duration("NaN", "ms"), None);
        let limit = (MAX_DURATION_SECS).to_string();
        assert_eq!(parse_duration(&limit, "s"), Some(Duration::seconds(MAX_DURATION_SECS)));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::milliseconds(250)), "250ms");
        assert_eq!(format_duration(Duration::milliseconds(5040)), "5.040s");
        assert_eq!(format_duration(Duration::seconds(90)), "1m 30s");
        assert_eq!(format_duration(Duration::seconds(3665)), "1h 1m");
    }
}
