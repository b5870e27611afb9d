//! Tolerant parsing of upstream date strings.
//!
//! The events endpoint is not consistent about date formats: depending on the
//! site and the field, values arrive as RFC 3339, as compact `YYYYMMDDTHHMMSS`,
//! or as `YYYY-MM-DD HH:MM:SS`. Naive forms carry no offset and are read as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse an upstream date string, trying each known format in order.
/// Returns `None` only when every format fails.
pub fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Date-only values (all-day events): start of day in UTC
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }

    // Some payloads append a stray Z to otherwise naive timestamps
    let bare = s.strip_suffix('Z').unwrap_or(s);

    for format in ["%Y%m%dT%H%M%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(bare, format) {
            return Some(n.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_event_date("2025-07-01T12:00:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_event_date("2025-07-01T08:00:00-04:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_compact() {
        let dt = parse_event_date("20250701T120000").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_compact_trailing_z() {
        let dt = parse_event_date("20250701T120000Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_dash_space() {
        let dt = parse_event_date("2025-07-01 12:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_iso() {
        let dt = parse_event_date("2025-07-01T12:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_date_only() {
        let dt = parse_event_date("2025-07-01").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_event_date("").is_none());
        assert!(parse_event_date("next tuesday").is_none());
        assert!(parse_event_date("2025-13-99").is_none());
    }
}
