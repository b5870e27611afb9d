//! Calendar discovery endpoint: given a site URL, enumerate the calendars
//! its events widget serves and preview a few upcoming events.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use subcal_core::cache::{self, CacheEntry, keys};
use subcal_core::event::EventRecord;
use subcal_core::{normalize_calendar_name, policy};

use crate::harvest;
use crate::state::AppState;

const CALENDARS_SOFT_TTL: Duration = Duration::from_secs(3600);
const SAMPLES_PER_CALENDAR: usize = 3;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/discover", get(discover))
}

#[derive(Deserialize)]
struct DiscoverParams {
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryResult {
    domain: String,
    website_id: String,
    calendars: Vec<CalendarSummary>,
    total_events: usize,
    sample_events: Vec<SampleEvent>,
    note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarSummary {
    name: String,
    normalized: String,
    event_count: usize,
    sample_events: Vec<SampleEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleEvent {
    title: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    calendar: Option<String>,
}

impl SampleEvent {
    fn from_event(event: &EventRecord, with_calendar: bool) -> Self {
        SampleEvent {
            title: event.title.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            calendar: with_calendar.then(|| event.calendar.clone().unwrap_or_default()),
        }
    }
}

async fn discover(State(state): State<AppState>, Query(params): Query<DiscoverParams>) -> Response {
    let Ok(parsed) = url::Url::parse(&params.url) else {
        warn!(url = %params.url, "discovery request with unparsable url");
        return error_json(StatusCode::BAD_REQUEST, "Invalid URL provided");
    };
    let Some(host) = parsed.host_str() else {
        return error_json(StatusCode::BAD_REQUEST, "Invalid URL provided");
    };
    // Non-default ports stay part of the tenant identity
    let domain = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let key = keys::calendars(&domain);
    let cached: Option<CacheEntry<DiscoveryResult>> =
        cache::get_entry(state.store.as_ref(), &key)
            .await
            .unwrap_or_else(|err| {
                warn!(%key, %err, "calendars cache read failed");
                None
            });
    if let Some(entry) = &cached {
        if entry.is_fresh(Utc::now()) {
            return cached_json(&entry.data, "public, max-age=3600", None);
        }
    }

    match run_discovery(&state, &domain, parsed.path()).await {
        Ok(response) => response,
        Err(err) => {
            warn!(domain, %err, "discovery failed");
            match cached {
                Some(entry) => {
                    info!(domain, "serving stale calendar list");
                    cached_json(&entry.data, "public, max-age=300", Some("stale"))
                }
                None => error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to discover calendars"),
            }
        }
    }
}

async fn run_discovery(state: &AppState, domain: &str, url_path: &str) -> anyhow::Result<Response> {
    let Some(site) = state.upstream.discover_site_info(domain).await else {
        info!(domain, "no site info found");
        return Ok(error_json(StatusCode::NOT_FOUND, "Unable to find calendar data"));
    };

    let events = harvest::sample_events(state, &site).await;
    info!(domain, count = events.len(), "sampled events for discovery");

    if events.is_empty() {
        // A sub-page URL that never showed the events page may still have a
        // working calendar at the site root; suggest starting over there.
        if url_path != "/" && !url_path.contains("/events") {
            return Ok(Json(serde_json::json!({
                "redirect": true,
                "suggestedUrl": format!("https://{domain}/"),
                "message": "No calendar found at the provided URL. Found calendars at the site root instead."
            }))
            .into_response());
        }
        return Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "No calendar events found",
                "message": "No calendar events were found at this URL. Please provide a URL to a page that displays a Subsplash calendar.",
                "totalEvents": 0,
                "calendars": [],
                "domain": domain,
            })),
        )
            .into_response());
    }

    let now = Utc::now();
    let result = build_result(&events, domain, &site.website_id, now);

    let entry = CacheEntry::new(result.clone(), domain, CALENDARS_SOFT_TTL);
    let key = keys::calendars(domain);
    if let Err(err) = cache::put_entry(state.store.as_ref(), &key, &entry, policy::HARD_TTL).await {
        warn!(%key, %err, "calendars cache write failed");
    }

    Ok(cached_json(&result, "public, max-age=3600", None))
}

/// Group sampled events into calendar summaries. Counts cover every sampled
/// event; previews are limited to upcoming ones.
fn build_result(
    events: &[EventRecord],
    domain: &str,
    website_id: &str,
    now: DateTime<Utc>,
) -> DiscoveryResult {
    let mut calendars: Vec<CalendarSummary> = Vec::new();
    for event in events {
        let Some(name) = event.calendar.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        let idx = match calendars.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                calendars.push(CalendarSummary {
                    name: name.to_string(),
                    normalized: normalize_calendar_name(name),
                    event_count: 0,
                    sample_events: Vec::new(),
                });
                calendars.len() - 1
            }
        };
        let summary = &mut calendars[idx];
        summary.event_count += 1;
        let upcoming = event.start.is_some_and(|start| start >= now);
        if upcoming && summary.sample_events.len() < SAMPLES_PER_CALENDAR {
            summary.sample_events.push(SampleEvent::from_event(event, false));
        }
    }
    calendars.sort_by(|a, b| a.name.cmp(&b.name));

    let sample_events: Vec<SampleEvent> = events
        .iter()
        .filter(|e| e.start.is_some_and(|start| start >= now))
        .take(SAMPLES_PER_CALENDAR)
        .map(|e| SampleEvent::from_event(e, true))
        .collect();

    DiscoveryResult {
        domain: domain.to_string(),
        website_id: website_id.to_string(),
        calendars,
        total_events: events.len(),
        sample_events,
        note: "Preview shows upcoming events only".to_string(),
    }
}

fn cached_json(result: &DiscoveryResult, cache_control: &str, cache_status: Option<&str>) -> Response {
    let mut response = Json(result).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = cache_control.parse() {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Some(status) = cache_status {
        if let Ok(value) = status.parse() {
            headers.insert("X-Cache-Status", value);
        }
    }
    response
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(title: &str, calendar: Option<&str>, start: DateTime<Utc>) -> EventRecord {
        let mut event = EventRecord::from_raw(
            &serde_json::json!({ "title": title, "start": start.to_rfc3339() }),
            "https://example.org",
        );
        event.calendar = calendar.map(str::to_string);
        event
    }

    #[test]
    fn test_build_result_groups_and_sorts_calendars() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let future = now + chrono::Duration::days(1);
        let events = vec![
            event("a", Some("Youth"), future),
            event("b", Some("Adults"), future),
            event("c", Some("Youth"), future),
            event("uncategorized", None, future),
        ];
        let result = build_result(&events, "example.org", "123", now);

        assert_eq!(result.total_events, 4);
        let names: Vec<&str> = result.calendars.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Adults", "Youth"]);
        assert_eq!(result.calendars[1].event_count, 2);
        assert_eq!(result.calendars[0].normalized, "adults");
    }

    #[test]
    fn test_samples_are_future_only_but_counts_include_past() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let past = now - chrono::Duration::days(10);
        let future = now + chrono::Duration::days(1);
        let events = vec![
            event("past", Some("Youth"), past),
            event("soon", Some("Youth"), future),
        ];
        let result = build_result(&events, "example.org", "123", now);

        assert_eq!(result.calendars[0].event_count, 2);
        let samples: Vec<&str> = result.calendars[0]
            .sample_events
            .iter()
            .map(|s| s.title.as_str())
            .collect();
        assert_eq!(samples, ["soon"]);
        assert_eq!(result.sample_events.len(), 1);
        assert_eq!(result.sample_events[0].calendar.as_deref(), Some("Youth"));
    }

    #[test]
    fn test_per_calendar_samples_capped_at_three() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let events: Vec<_> = (0..5)
            .map(|i| {
                event(
                    &format!("e{i}"),
                    Some("Youth"),
                    now + chrono::Duration::days(i),
                )
            })
            .collect();
        let result = build_result(&events, "example.org", "123", now);
        assert_eq!(result.calendars[0].sample_events.len(), 3);
        assert_eq!(result.calendars[0].event_count, 5);
    }
}
