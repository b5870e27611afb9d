//! iCal document generation.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::EventRecord;

/// Zone assumed when events carry no timezone of their own.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// RFC 5545 limits content lines to 75 octets; longer lines continue on the
/// next line behind a single leading space.
const MAX_LINE_OCTETS: usize = 75;

static TRAILING_CALENDAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i) Calendar$").unwrap());

/// Encode `events` as a calendar document for `domain`.
///
/// When `calendar_name` is `None` the feed merges every calendar and each
/// summary is suffixed with its source calendar label. Events without a start
/// are dropped.
pub fn generate_ical(events: &[EventRecord], domain: &str, calendar_name: Option<&str>) -> String {
    let site_name = domain.split('.').next().unwrap_or(domain);
    let display_name = match calendar_name {
        Some(cal) => format!("{site_name} - {cal}"),
        None => format!("{site_name} Events (All Calendars)"),
    };

    let mut lines: Vec<String> = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "PRODID:-//Subsplash//subsplash.com".to_string(),
        format!("X-WR-CALNAME:{display_name}"),
    ];

    // Timezones actually observed in the data; the last one doubles as the
    // assumption for events that carry none.
    let mut timezones_used: BTreeSet<&str> = BTreeSet::new();
    let mut detected_timezone: Option<&str> = None;
    for event in events {
        if let Some(tz) = event.timezone.as_deref() {
            timezones_used.insert(tz);
            detected_timezone = Some(tz);
        }
    }

    let detected_timezone = detected_timezone.unwrap_or_else(|| {
        warn!(domain, "no timezone data found in events, falling back to {DEFAULT_TIMEZONE}");
        timezones_used.insert(DEFAULT_TIMEZONE);
        DEFAULT_TIMEZONE
    });

    for tz in &timezones_used {
        for line in vtimezone_definition(tz) {
            lines.push((*line).to_string());
        }
    }

    for event in events {
        let Some(start) = event.start else {
            debug!(title = %event.title, "skipping event without parsable start");
            continue;
        };
        push_event(&mut lines, event, start, domain, detected_timezone, calendar_name);
    }

    lines.push("END:VCALENDAR".to_string());

    fold_lines(&lines)
}

fn push_event(
    lines: &mut Vec<String>,
    event: &EventRecord,
    start: DateTime<Utc>,
    domain: &str,
    detected_timezone: &str,
    calendar_name: Option<&str>,
) {
    lines.push("BEGIN:VEVENT".to_string());

    let event_id = event
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    lines.push(format!("UID:{event_id}@{domain}"));

    let (tzid, tz) = resolve_timezone(event.timezone.as_deref().unwrap_or(detected_timezone));

    if event.all_day {
        lines.push(format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")));
        if let Some(end) = event.end {
            lines.push(format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")));
        }
    } else {
        lines.push(format!("DTSTART;TZID={tzid}:{}", format_local(start, tz)));
        // The widget frequently omits end times; synthesize one hour
        let end = event.end.unwrap_or(start + chrono::Duration::hours(1));
        lines.push(format!("DTEND;TZID={tzid}:{}", format_local(end, tz)));
    }

    let mut title = event.title.clone();
    if calendar_name.is_none() {
        if let Some(cal) = event.calendar.as_deref() {
            let clean = TRAILING_CALENDAR_RE.replace(cal, "");
            title = format!("{title} ({clean})");
        }
    }
    lines.push(format!("SUMMARY:{}", escape_ical_text(&title)));

    let mut description = event
        .description
        .clone()
        .or_else(|| event.description_text.clone())
        .unwrap_or_default();
    if let Some(url) = event.url.as_deref() {
        if description.trim().is_empty() {
            description = format!("Full details available at: {url}");
        } else {
            description = format!("{}\n\nFull details available at: {url}", description.trim());
        }
    }
    if !description.trim().is_empty() {
        lines.push(format!("DESCRIPTION:{}", escape_ical_text(&description)));
    }

    if let Some(location) = event.location.as_ref().and_then(|l| l.display()) {
        lines.push(format!("LOCATION:{}", escape_ical_text(&location)));
    }

    lines.push(format!("DTSTAMP:{}", format_utc(Utc::now())));
    if let Some(created) = event.created_at {
        lines.push(format!("CREATED:{}", format_utc(created)));
    }
    if let Some(updated) = event.updated_at {
        lines.push(format!("LAST-MODIFIED:{}", format_utc(updated)));
    }

    if !event.categories.is_empty() {
        let joined = event
            .categories
            .iter()
            .map(|c| escape_ical_text(c))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(format!("CATEGORIES:{joined}"));
    }

    lines.push("END:VEVENT".to_string());
}

/// Resolve a timezone name to a `Tz`, falling back to the default zone when
/// the name is not a known IANA identifier. The emitted TZID always matches
/// the zone actually used for conversion.
fn resolve_timezone(name: &str) -> (&str, Tz) {
    match Tz::from_str(name) {
        Ok(tz) => (name, tz),
        Err(_) => {
            warn!(timezone = name, "unknown timezone, falling back to {DEFAULT_TIMEZONE}");
            (DEFAULT_TIMEZONE, chrono_tz::America::New_York)
        }
    }
}

/// Wall-clock rendering of a UTC instant in `tz`. chrono-tz applies the zone's
/// actual DST rules, so transitions are handled correctly.
fn format_local(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y%m%dT%H%M%S").to_string()
}

fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Prepare free text for a content line: strip HTML tags, decode the common
/// entities, normalize horizontal whitespace (line breaks survive), then apply
/// the wire format's backslash escaping.
pub fn escape_ical_text(text: &str) -> String {
    let stripped = HTML_TAG_RE.replace_all(text, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed = SPACE_RUN_RE.replace_all(&decoded, " ");

    collapsed
        .trim()
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Hard-fold logical lines at 75 octets and join with CRLF. Continuation
/// lines start with a single space; folds land on char boundaries so
/// multi-byte text is never split mid-character.
fn fold_lines(lines: &[String]) -> String {
    let mut folded: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.len() <= MAX_LINE_OCTETS {
            folded.push(line.clone());
            continue;
        }
        let mut rest = line.clone();
        while rest.len() > MAX_LINE_OCTETS {
            let mut cut = MAX_LINE_OCTETS;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            folded.push(rest[..cut].to_string());
            rest = format!(" {}", &rest[cut..]);
        }
        folded.push(rest);
    }
    folded.join("\r\n")
}

/// Static VTIMEZONE blocks for the US zones the upstream serves. Unknown
/// zones reuse the Eastern block, matching `resolve_timezone`'s fallback.
fn vtimezone_definition(timezone: &str) -> &'static [&'static str] {
    match timezone {
        "America/Chicago" => &[
            "BEGIN:VTIMEZONE",
            "TZID:America/Chicago",
            "BEGIN:STANDARD",
            "DTSTART:20071104T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=11;BYDAY=1SU",
            "TZNAME:CST",
            "TZOFFSETFROM:-0500",
            "TZOFFSETTO:-0600",
            "END:STANDARD",
            "BEGIN:DAYLIGHT",
            "DTSTART:20070311T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=2SU",
            "TZNAME:CDT",
            "TZOFFSETFROM:-0600",
            "TZOFFSETTO:-0500",
            "END:DAYLIGHT",
            "END:VTIMEZONE",
        ],
        "America/Denver" => &[
            "BEGIN:VTIMEZONE",
            "TZID:America/Denver",
            "BEGIN:STANDARD",
            "DTSTART:20071104T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=11;BYDAY=1SU",
            "TZNAME:MST",
            "TZOFFSETFROM:-0600",
            "TZOFFSETTO:-0700",
            "END:STANDARD",
            "BEGIN:DAYLIGHT",
            "DTSTART:20070311T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=2SU",
            "TZNAME:MDT",
            "TZOFFSETFROM:-0700",
            "TZOFFSETTO:-0600",
            "END:DAYLIGHT",
            "END:VTIMEZONE",
        ],
        "America/Los_Angeles" => &[
            "BEGIN:VTIMEZONE",
            "TZID:America/Los_Angeles",
            "BEGIN:STANDARD",
            "DTSTART:20071104T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=11;BYDAY=1SU",
            "TZNAME:PST",
            "TZOFFSETFROM:-0700",
            "TZOFFSETTO:-0800",
            "END:STANDARD",
            "BEGIN:DAYLIGHT",
            "DTSTART:20070311T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=2SU",
            "TZNAME:PDT",
            "TZOFFSETFROM:-0800",
            "TZOFFSETTO:-0700",
            "END:DAYLIGHT",
            "END:VTIMEZONE",
        ],
        _ => &[
            "BEGIN:VTIMEZONE",
            "TZID:America/New_York",
            "BEGIN:STANDARD",
            "DTSTART:20071104T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=11;BYDAY=1SU",
            "TZNAME:EST",
            "TZOFFSETFROM:-0400",
            "TZOFFSETTO:-0500",
            "END:STANDARD",
            "BEGIN:DAYLIGHT",
            "DTSTART:20070311T020000",
            "RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=2SU",
            "TZNAME:EDT",
            "TZOFFSETFROM:-0500",
            "TZOFFSETTO:-0400",
            "END:DAYLIGHT",
            "END:VTIMEZONE",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Location;
    use chrono::{NaiveDateTime, TimeZone};

    fn make_event(title: &str) -> EventRecord {
        EventRecord {
            id: Some("evt1".to_string()),
            title: title.to_string(),
            start: Some(Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()),
            end: None,
            all_day: false,
            timezone: Some("America/New_York".to_string()),
            description: None,
            description_text: None,
            location: None,
            url: None,
            calendar: None,
            categories: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    /// Rejoin folded continuation lines into logical lines.
    fn unfold(ics: &str) -> Vec<String> {
        let mut logical: Vec<String> = Vec::new();
        for line in ics.split("\r\n") {
            if let Some(rest) = line.strip_prefix(' ') {
                logical
                    .last_mut()
                    .expect("continuation without preceding line")
                    .push_str(rest);
            } else {
                logical.push(line.to_string());
            }
        }
        logical
    }

    #[test]
    fn test_timezone_qualified_start_and_synthesized_end() {
        // 12:00 UTC in July is 08:00 EDT; no end means one hour is added
        let ics = generate_ical(&[make_event("Lunch")], "example.org", None);
        assert!(ics.contains("DTSTART;TZID=America/New_York:20250701T080000"), "{ics}");
        assert!(ics.contains("DTEND;TZID=America/New_York:20250701T090000"), "{ics}");
    }

    #[test]
    fn test_dtstart_roundtrips_through_timezone() {
        let event = make_event("Lunch");
        let original = event.start.unwrap();
        let ics = generate_ical(&[event], "example.org", None);

        let dtstart_line = unfold(&ics)
            .into_iter()
            .find(|l| l.starts_with("DTSTART;TZID=America/New_York:"))
            .unwrap();
        let local = dtstart_line.rsplit(':').next().unwrap().to_string();
        let naive = NaiveDateTime::parse_from_str(&local, "%Y%m%dT%H%M%S").unwrap();
        let reparsed = naive
            .and_local_timezone(chrono_tz::America::New_York)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_all_day_uses_value_date() {
        let mut event = make_event("Retreat");
        event.all_day = true;
        event.end = Some(Utc.with_ymd_and_hms(2025, 7, 3, 0, 0, 0).unwrap());
        let ics = generate_ical(&[event], "example.org", None);
        assert!(ics.contains("DTSTART;VALUE=DATE:20250701"), "{ics}");
        assert!(ics.contains("DTEND;VALUE=DATE:20250703"), "{ics}");
    }

    #[test]
    fn test_missing_timezone_falls_back_with_definition() {
        let mut event = make_event("Lunch");
        event.timezone = None;
        let ics = generate_ical(&[event], "example.org", None);
        assert!(ics.contains("TZID:America/New_York"), "{ics}");
        assert!(ics.contains("DTSTART;TZID=America/New_York:"), "{ics}");
    }

    #[test]
    fn test_one_vtimezone_block_per_distinct_zone() {
        let mut chicago = make_event("Central");
        chicago.timezone = Some("America/Chicago".to_string());
        let eastern = make_event("Eastern");
        let ics = generate_ical(&[chicago, eastern], "example.org", None);
        assert_eq!(ics.matches("BEGIN:VTIMEZONE").count(), 2);
        assert!(ics.contains("TZID:America/Chicago"));
        assert!(ics.contains("TZID:America/New_York"));
    }

    #[test]
    fn test_unknown_timezone_falls_back_consistently() {
        let mut event = make_event("Odd");
        event.timezone = Some("Not/AZone".to_string());
        let ics = generate_ical(&[event], "example.org", None);
        // TZID emitted must match the zone used for conversion
        assert!(ics.contains("DTSTART;TZID=America/New_York:20250701T080000"), "{ics}");
    }

    #[test]
    fn test_summary_suffix_in_merged_feed() {
        let mut event = make_event("Lunch");
        event.calendar = Some("Youth Calendar".to_string());

        let merged = generate_ical(std::slice::from_ref(&event), "example.org", None);
        assert!(unfold(&merged).contains(&"SUMMARY:Lunch (Youth)".to_string()), "{merged}");

        // Filtered feeds keep the bare title
        let filtered = generate_ical(&[event], "example.org", Some("Youth Calendar"));
        assert!(unfold(&filtered).contains(&"SUMMARY:Lunch".to_string()), "{filtered}");
    }

    #[test]
    fn test_events_without_start_are_dropped() {
        let mut event = make_event("Ghost");
        event.start = None;
        let ics = generate_ical(&[event], "example.org", None);
        assert!(!ics.contains("BEGIN:VEVENT"), "{ics}");
    }

    #[test]
    fn test_description_link_footer_and_location() {
        let mut event = make_event("Lunch");
        event.description = Some("<p>Bring a &amp; friend</p>".to_string());
        event.url = Some("https://example.org/event/abc/lunch".to_string());
        event.location = Some(Location::Structured {
            name: Some("Hall".to_string()),
            address: Some("1 Main St".to_string()),
        });
        let ics = generate_ical(&[event], "example.org", None);
        let logical = unfold(&ics);
        let description = logical
            .iter()
            .find(|l| l.starts_with("DESCRIPTION:"))
            .unwrap();
        assert_eq!(
            description,
            "DESCRIPTION:Bring a & friend\\n\\nFull details available at: https://example.org/event/abc/lunch"
        );
        assert!(logical.contains(&"LOCATION:Hall\\, 1 Main St".to_string()));
    }

    #[test]
    fn test_lines_fold_at_75_and_rejoin() {
        let mut event = make_event("Annual Meeting");
        event.description = Some("word ".repeat(60));
        let ics = generate_ical(&[event], "example.org", None);

        for line in ics.split("\r\n") {
            assert!(line.len() <= 75, "line exceeds 75 octets: {line:?}");
        }

        let description = unfold(&ics)
            .into_iter()
            .find(|l| l.starts_with("DESCRIPTION:"))
            .unwrap();
        // 60 repetitions collapse to single spaces, trailing space trimmed
        let expected = format!("DESCRIPTION:{}", "word ".repeat(60).trim());
        assert_eq!(description, expected);
    }

    #[test]
    fn test_escape_ical_text() {
        assert_eq!(escape_ical_text("a;b,c\nd"), "a\\;b\\,c\\nd");
        assert_eq!(escape_ical_text("<b>bold</b> &lt;tag&gt;"), "bold <tag>");
        assert_eq!(escape_ical_text("back\\slash"), "back\\\\slash");
        assert_eq!(escape_ical_text("  spaced\t\tout  "), "spaced out");
        assert_eq!(escape_ical_text(""), "");
    }

    #[test]
    fn test_calendar_display_name() {
        let ics = generate_ical(&[make_event("Lunch")], "gracechurch.org", Some("Youth"));
        assert!(ics.contains("X-WR-CALNAME:gracechurch - Youth"), "{ics}");

        let all = generate_ical(&[make_event("Lunch")], "gracechurch.org", None);
        assert!(all.contains("X-WR-CALNAME:gracechurch Events (All Calendars)"), "{all}");
    }

    #[test]
    fn test_categories_line() {
        let mut event = make_event("Lunch");
        event.categories = vec!["Food, Drink".to_string(), "Social".to_string()];
        let ics = generate_ical(&[event], "example.org", None);
        assert!(unfold(&ics).contains(&"CATEGORIES:Food\\, Drink,Social".to_string()), "{ics}");
    }
}
