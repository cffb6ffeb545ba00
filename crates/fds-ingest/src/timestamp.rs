//! Timestamp normalization
//!
//! Log timestamps look like `2024-09-14T07:14:07.419698061Z`: ISO-8601 with
//! anywhere from zero to nine (or more) fractional digits and a trailing `Z`.
//! Everything past microsecond precision is cut off before parsing.

use chrono::NaiveDateTime;

/// Format the normalized timestamp must satisfy (`%.f` takes the dot and the fraction)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// `YYYY-MM-DDTHH:MM:SS.ffffff` is 26 characters long
const MICROSECOND_PREFIX_LEN: usize = 26;

/// Truncate to microsecond precision and drop the zone marker.
///
/// Strings with a fractional separator keep at most their first 26
/// characters. The trailing `Z` is stripped in every case.
pub fn normalize_timestamp(raw: &str) -> &str {
    let truncated = if raw.contains('.') {
        match raw.char_indices().nth(MICROSECOND_PREFIX_LEN) {
            Some((cut, _)) => &raw[..cut],
            None => raw,
        }
    } else {
        raw
    };
    truncated.trim_end_matches('Z')
}

/// Normalize then parse a raw log timestamp
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(normalize_timestamp(raw), TIMESTAMP_FORMAT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_nanoseconds_truncated_to_micros() {
        assert_eq!(
            normalize_timestamp("2024-09-14T07:14:07.419698061Z"),
            "2024-09-14T07:14:07.419698"
        );
        let parsed = parse_timestamp("2024-09-14T07:14:07.419698061Z").unwrap();
        assert_eq!(parsed.nanosecond(), 419_698_000);
        assert_eq!(parsed.and_utc().timestamp_subsec_micros(), 419_698);
    }

    #[test]
    fn test_millisecond_fraction_padded() {
        assert_eq!(
            normalize_timestamp("2024-09-13T23:58:17.000Z"),
            "2024-09-13T23:58:17.000"
        );
        let parsed = parse_timestamp("2024-09-13T23:58:17.000Z").unwrap();
        assert_eq!(parsed.nanosecond(), 0);
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 9, 13));
        assert_eq!(parsed.second(), 17);
    }

    #[test]
    fn test_whole_seconds_only_strip_zone() {
        assert_eq!(normalize_timestamp("2024-09-13T23:58:17Z"), "2024-09-13T23:58:17");
        let parsed = parse_timestamp("2024-09-13T23:58:17Z").unwrap();
        assert_eq!(parsed.nanosecond(), 0);
    }

    #[test]
    fn test_exact_microseconds_unchanged() {
        let parsed = parse_timestamp("2023-01-02T03:04:05.123456Z").unwrap();
        assert_eq!(parsed.and_utc().timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_malformed_timestamps_fail() {
        assert!(parse_timestamp("not-a-date").is_err());
        assert!(parse_timestamp("2024-13-40T07:14:07.1Z").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_multibyte_input_does_not_panic() {
        assert!(parse_timestamp("2024-09-14T07:14:07.4196980éééZ").is_ok());
        assert!(parse_timestamp("2024-09-14T07:é4:07.4196980Z").is_err());
    }
}
