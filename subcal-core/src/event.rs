//! Normalized event records.
//!
//! The upstream events endpoint returns loosely-structured JSON whose field
//! names vary between sites and widget versions. `EventRecord::from_raw` maps
//! one raw object onto a canonical, strongly-typed record in a single place;
//! the rest of the pipeline never touches raw JSON again.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates::parse_event_date;

/// A calendar event, normalized from the upstream payload.
///
/// `start` may be absent when the upstream value was missing or unparsable;
/// such records survive harvesting and caching but are dropped before encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Option<String>,
    pub title: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    /// IANA timezone name, when the upstream supplied one.
    pub timezone: Option<String>,
    /// Description as delivered (may contain HTML).
    pub description: Option<String>,
    /// Plain-text description from the detail API, when enhanced.
    pub description_text: Option<String>,
    pub location: Option<Location>,
    /// Canonical detail URL, absolute.
    pub url: Option<String>,
    /// Calendar/category label, free text.
    pub calendar: Option<String>,
    pub categories: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Event location: either a bare string or a structured name/address pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Text(String),
    Structured {
        name: Option<String>,
        address: Option<String>,
    },
}

impl Location {
    /// Single-line rendering for the LOCATION feed field.
    pub fn display(&self) -> Option<String> {
        match self {
            Location::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Location::Structured { name, address } => {
                let parts: Vec<&str> = [name.as_deref(), address.as_deref()]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }
        }
    }

    fn from_raw(raw: &Value) -> Option<Self> {
        if let Some(s) = raw.as_str() {
            return Some(Location::Text(s.to_string()));
        }
        if raw.is_object() {
            let name = raw.get("name").and_then(Value::as_str).map(String::from);
            let address = raw.get("address").and_then(Value::as_str).map(String::from);
            if name.is_some() || address.is_some() {
                return Some(Location::Structured { name, address });
            }
        }
        None
    }
}

static SHORT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/event/([^/]+)").unwrap());

impl EventRecord {
    /// Map one upstream JSON object onto the canonical record.
    ///
    /// Field priority mirrors the order the widget's own client reads them;
    /// relative detail URLs are rewritten absolute against `base_url`.
    pub fn from_raw(raw: &Value, base_url: &str) -> Self {
        let title = str_field(raw, &["title", "name", "event_name"])
            .unwrap_or_else(|| "Untitled Event".to_string());

        let id = raw
            .get("id")
            .or_else(|| raw.get("event_id"))
            .and_then(json_as_string_ref);

        let start = str_field(raw, &["start", "startDate", "start_date", "start_time", "date"])
            .as_deref()
            .and_then(parse_event_date);
        let end = str_field(raw, &["end", "endDate", "end_date", "end_time"])
            .as_deref()
            .and_then(parse_event_date);

        let all_day = ["allDay", "all_day"]
            .iter()
            .find_map(|k| raw.get(*k).and_then(Value::as_bool))
            .unwrap_or(false);

        let timezone = str_field(
            raw,
            &["timezone", "time_zone", "tz", "timeZone", "event_timezone"],
        );

        let url = str_field(raw, &["url", "link", "event_url"])
            .map(|u| absolute_url(base_url, &u));

        let location = ["location", "venue", "address"]
            .iter()
            .filter_map(|k| raw.get(*k))
            .find_map(Location::from_raw);

        let categories = raw
            .get("categories")
            .or_else(|| raw.get("tags"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(json_as_string_ref)
                    .collect::<Vec<String>>()
            })
            .or_else(|| {
                raw.get("category")
                    .and_then(Value::as_str)
                    .map(|s| vec![s.to_string()])
            })
            .unwrap_or_default();

        let created_at = str_field(raw, &["created_at", "createdAt"])
            .as_deref()
            .and_then(parse_event_date);
        let updated_at = str_field(raw, &["updated_at", "updatedAt", "modified_at"])
            .as_deref()
            .and_then(parse_event_date);

        EventRecord {
            id,
            title,
            start,
            end,
            all_day,
            timezone,
            description: str_field(raw, &["description", "summary", "details"]),
            description_text: str_field(raw, &["description_text"]),
            location,
            url,
            calendar: calendar_label(raw),
            categories,
            created_at,
            updated_at,
        }
    }

    /// URL path segment identifying this event in the upstream detail API,
    /// e.g. `x5vjpdn` from `/event/x5vjpdn/july-fellowship-lunch`.
    pub fn short_code(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        SHORT_CODE_RE
            .captures(url)
            .map(|c| c[1].to_string())
    }
}

/// Calendar/category label for an event, trying each known field in priority
/// order. The `calendar` field may itself be an object carrying `name`/`title`.
fn calendar_label(raw: &Value) -> Option<String> {
    if let Some(cal) = raw.get("calendar") {
        if let Some(s) = cal.as_str() {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
        if cal.is_object() {
            if let Some(s) = ["name", "title"]
                .iter()
                .find_map(|k| cal.get(*k).and_then(Value::as_str))
            {
                return Some(s.to_string());
            }
        }
    }
    str_field(
        raw,
        &[
            "calendar_name",
            "calendarName",
            "category",
            "categoryName",
            "category_name",
        ],
    )
}

/// Normalize a calendar name for use in URLs: lowercase `[a-z0-9_]` with
/// single underscores between runs and none leading/trailing. Idempotent.
pub fn normalize_calendar_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut separator_pending = false;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if separator_pending && !out.is_empty() {
                out.push('_');
            }
            separator_pending = false;
            out.push(c);
        } else {
            separator_pending = true;
        }
    }
    out
}

/// First non-empty string value among `keys`.
fn str_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find_map(json_as_string_ref)
}

/// Accept both string and numeric JSON values as strings (IDs in particular
/// arrive as either).
fn json_as_string_ref(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn absolute_url(base_url: &str, url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else if url.starts_with('/') {
        format!("{base_url}{url}")
    } else {
        format!("{base_url}/{url}")
    }
}
