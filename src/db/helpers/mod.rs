use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use thiserror::Error;

const EARLIEST_STORED: &str = "0000-01-01T00:00:00.000000000Z";
const LATEST_STORED: &str = "9999-12-31T23:59:59.999999999Z";

/// Raised for timestamps outside the years 0000..=9999, which have no
/// fixed-width text form.
#[derive(Debug, Error)]
#[error("timestamp {0} is outside the storable range (years 0000 to 9999)")]
pub struct TimestampOutOfRange(pub DateTime<Utc>);

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width UTC form with nanoseconds, so string order in SQLite matches
/// time order. Only valid for storable timestamps; see [`storable_timestamp`].
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Format a timestamp that is about to be written, rejecting years that
/// would break the fixed width.
pub fn storable_timestamp(value: &DateTime<Utc>) -> Result<String> {
    if (0..=9999).contains(&value.year()) {
        Ok(format_timestamp(value))
    } else {
        Err(anyhow::Error::new(TimestampOutOfRange(*value)))
    }
}

/// Format a range bound, clamping it into the storable range.
pub fn range_bound(value: &DateTime<Utc>) -> String {
    match value.year() {
        year if year < 0 => EARLIEST_STORED.to_string(),
        year if year > 9999 => LATEST_STORED.to_string(),
        _ => format_timestamp(value),
    }
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(format_timestamp(&late), "2024-03-10T00:00:00.000000000Z");

        let tick = late + Duration::nanoseconds(1);
        assert!(format_timestamp(&late) < format_timestamp(&tick));
    }

    #[test]
    fn timestamp_round_trips_through_text() {
        let ts = Utc.with_ymd_and_hms(2023, 11, 5, 8, 30, 0).unwrap() + Duration::nanoseconds(123);
        let parsed = parse_datetime(&format_timestamp(&ts), "viewed_at").unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn years_beyond_four_digits_are_not_storable() {
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let err = storable_timestamp(&far).unwrap_err();
        assert!(err.downcast_ref::<TimestampOutOfRange>().is_some());

        let ancient = Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap();
        assert!(storable_timestamp(&ancient).is_err());

        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(storable_timestamp(&last).is_ok());
    }

    #[test]
    fn range_bounds_clamp_into_storable_years() {
        let far = Utc.with_ymd_and_hms(10000, 1, 2, 0, 0, 0).unwrap();
        let ancient = Utc.with_ymd_and_hms(-5, 1, 1, 0, 0, 0).unwrap();
        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(range_bound(&far), LATEST_STORED);
        assert_eq!(range_bound(&ancient), EARLIEST_STORED);
        assert!(format_timestamp(&last) <= range_bound(&far));
    }

    #[test]
    fn negative_counters_are_rejected() {
        assert!(to_u64(-1, "dwell_secs").is_err());
        assert_eq!(to_u64(42, "dwell_secs").unwrap(), 42);
    }
}
