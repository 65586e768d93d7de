//! Date and timestamp recognition shared by value classification, schema
//! inference and the date standardization pass.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// True for strings of the exact form `YYYY-MM-DD` that name a real day.
pub fn is_iso_date(s: &str) -> bool {
    ISO_DATE.is_match(s) && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Parse a string carrying both a date and a time of day.
/// Offsets are dropped; the wall-clock time is kept.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Parse anything that reads as a date or a timestamp. Date-only values
/// resolve to midnight.
pub fn parse_date_like(s: &str) -> Option<NaiveDateTime> {
    if let Some(ts) = parse_timestamp(s) {
        return Some(ts);
    }
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date() {
        assert!(is_iso_date("2024-01-05"));
        assert!(!is_iso_date("2024-13-05"));
        assert!(!is_iso_date("2024-01-05T10:00:00"));
        assert!(!is_iso_date("01/05/2024"));
    }

    #[test]
    fn test_timestamps_need_a_time() {
        assert!(parse_timestamp("2024-01-05T10:00:00").is_some());
        assert!(parse_timestamp("2024-01-05T10:00:00.250").is_some());
        assert!(parse_timestamp("2024-01-05T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-01-05 10:00").is_some());
        assert!(parse_timestamp("2024-01-05").is_none());
        assert!(parse_timestamp("soon").is_none());
    }

    #[test]
    fn test_offset_keeps_wall_clock() {
        let ts = parse_timestamp("2024-01-05T23:30:00+05:00").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2024-01-05 23:30");
    }

    #[test]
    fn test_date_like_accepts_common_layouts() {
        for s in ["2024-01-05", "2024/01/05", "01/05/2024", "January 05, 2024"] {
            let parsed = parse_date_like(s).unwrap_or_else(|| panic!("{s} should parse"));
            assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-01-05");
        }
        assert!(parse_date_like("not a date").is_none());
    }
}
