//! Reference-timezone clock and lenient timestamp parsing.
//!
//! All shard paths are derived from dates in a single fixed reference
//! timezone (UTC+8) so that the same record shards identically on every
//! host, independent of the machine's local zone.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Offset of the reference timezone, in seconds east of UTC.
const REFERENCE_OFFSET_SECS: i32 = 8 * 3600;

/// Returns the fixed reference timezone.
pub fn reference_zone() -> FixedOffset {
    FixedOffset::east_opt(REFERENCE_OFFSET_SECS).expect("static offset is in range")
}

/// Returns the current time in the reference timezone.
pub fn reference_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&reference_zone())
}

/// Parses a timestamp string into the reference timezone.
///
/// Accepts RFC 3339, RFC 2822, and the common `Y-m-d H:M:S` shapes (with
/// optional fractional seconds, `T` separator, or date only). Inputs
/// without a timezone are treated as UTC before conversion. Returns `None`
/// for anything unparsable; callers fall back to [`reference_now`].
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&reference_zone()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&reference_zone()));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(from_naive_utc(naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(from_naive_utc(date.and_hms_opt(0, 0, 0)?));
    }

    None
}

fn from_naive_utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive)
        .with_timezone(&reference_zone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_rfc3339_with_zone() {
        let dt = parse_timestamp("2024-05-03T01:30:00+00:00").unwrap();
        // 01:30 UTC is 09:30 in the reference zone.
        assert_eq!(dt.hour(), 9);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn naive_input_is_treated_as_utc() {
        let dt = parse_timestamp("2024-05-03 23:00:00").unwrap();
        // 23:00 UTC rolls over to 07:00 the next day in UTC+8.
        assert_eq!(dt.hour(), 7);
        assert_eq!(dt.date_naive().to_string(), "2024-05-04");
    }

    #[test]
    fn parses_date_only() {
        let dt = parse_timestamp("2024-05-03").unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt.date_naive().to_string(), "2024-05-03");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("2024-13-45").is_none());
    }

    #[test]
    fn reference_now_is_in_reference_zone() {
        assert_eq!(
            reference_now().offset().local_minus_utc(),
            REFERENCE_OFFSET_SECS
        );
    }
}
