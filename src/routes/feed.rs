//! Subscription feed endpoints: `/{domain}.ics` and
//! `/{domain}/{calendar}.ics`.

use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use tracing::{info, warn};

use subcal_core::cache::{self, CacheEntry, keys};
use subcal_core::event::EventRecord;
use subcal_core::ics::generate_ical;
use subcal_core::{normalize_calendar_name, policy};

use crate::harvest;
use crate::state::AppState;

const FEED_SOFT_TTL: Duration = Duration::from_secs(3600);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{filename}", get(all_calendars))
        .route("/{domain}/{calendar}", get(one_calendar))
}

async fn all_calendars(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    let Some(domain) = filename.strip_suffix(".ics") else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    serve_feed(&state, domain, None).await
}

async fn one_calendar(
    State(state): State<AppState>,
    Path((domain, calendar)): Path<(String, String)>,
) -> Response {
    let Some(calendar) = calendar.strip_suffix(".ics") else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    serve_feed(&state, &domain, Some(calendar)).await
}

async fn serve_feed(state: &AppState, domain: &str, calendar: Option<&str>) -> Response {
    let key = keys::feed(domain, calendar);
    let cached: Option<CacheEntry<String>> = cache::get_entry(state.store.as_ref(), &key)
        .await
        .unwrap_or_else(|err| {
            warn!(%key, %err, "feed cache read failed");
            None
        });
    if let Some(entry) = &cached {
        if entry.is_fresh(Utc::now()) {
            return ics_response(&entry.data, domain, calendar, "public, max-age=3600", None);
        }
    }

    match build_feed(state, domain, calendar).await {
        Ok(response) => response,
        Err(err) => {
            warn!(domain, ?calendar, %err, "feed generation failed");
            match cached {
                Some(entry) => {
                    info!(domain, "serving stale feed");
                    ics_response(&entry.data, domain, calendar, "public, max-age=300", Some("stale"))
                }
                None => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Error generating calendar feed")
                        .into_response()
                }
            }
        }
    }
}

async fn build_feed(state: &AppState, domain: &str, calendar: Option<&str>) -> anyhow::Result<Response> {
    // A single-calendar feed can often be cut from the cached full harvest
    // without touching the upstream at all.
    if let Some(calendar) = calendar {
        let cached_all: Option<CacheEntry<Vec<EventRecord>>> =
            cache::get_entry(state.store.as_ref(), &keys::all_events(domain))
                .await
                .unwrap_or_else(|err| {
                    warn!(domain, %err, "events-data cache read failed");
                    None
                });
        if let Some(entry) = cached_all {
            let filtered = filter_by_calendar(entry.data, calendar);
            if !filtered.is_empty() {
                let ics = generate_ical(&filtered, domain, Some(calendar));
                store_feed(state, domain, Some(calendar), &ics).await;
                return Ok(ics_response(&ics, domain, Some(calendar), "public, max-age=3600", None));
            }
        }
    }

    let Some(site) = state.upstream.discover_site_info(domain).await else {
        return Ok((StatusCode::NOT_FOUND, "Unable to find calendar for this site").into_response());
    };

    let events = harvest::fetch_all_events(state, &site).await;
    info!(domain, count = events.len(), "full harvest complete");

    if !events.is_empty() {
        let entry = CacheEntry::new(events.clone(), domain, FEED_SOFT_TTL);
        let key = keys::all_events(domain);
        if let Err(err) =
            cache::put_entry(state.store.as_ref(), &key, &entry, policy::HARD_TTL).await
        {
            warn!(%key, %err, "events-data cache write failed");
        }
    }

    let events = match calendar {
        Some(calendar) => {
            let filtered = filter_by_calendar(events, calendar);
            if filtered.is_empty() {
                // No such calendar (or an empty one): point subscribers at
                // the merged feed instead of serving an empty document
                return Ok((
                    StatusCode::FOUND,
                    [
                        (header::LOCATION, format!("/{domain}.ics")),
                        (header::CACHE_CONTROL, "no-cache".to_string()),
                    ],
                )
                    .into_response());
            }
            filtered
        }
        None => events,
    };

    let ics = generate_ical(&events, domain, calendar);
    store_feed(state, domain, calendar, &ics).await;
    Ok(ics_response(&ics, domain, calendar, "public, max-age=3600", None))
}

fn filter_by_calendar(events: Vec<EventRecord>, calendar: &str) -> Vec<EventRecord> {
    let wanted = normalize_calendar_name(calendar);
    events
        .into_iter()
        .filter(|e| {
            normalize_calendar_name(e.calendar.as_deref().unwrap_or_default()) == wanted
        })
        .collect()
}

async fn store_feed(state: &AppState, domain: &str, calendar: Option<&str>, ics: &str) {
    let mut entry = CacheEntry::new(ics.to_string(), domain, FEED_SOFT_TTL);
    if let Some(calendar) = calendar {
        entry = entry.with_calendar_name(calendar);
    }
    let key = keys::feed(domain, calendar);
    if let Err(err) = cache::put_entry(state.store.as_ref(), &key, &entry, policy::HARD_TTL).await {
        warn!(%key, %err, "feed cache write failed");
    }
}

fn ics_response(
    ics: &str,
    domain: &str,
    calendar: Option<&str>,
    cache_control: &str,
    cache_status: Option<&str>,
) -> Response {
    let filename = match calendar {
        Some(calendar) => format!("{domain}-{calendar}-calendar.ics"),
        None => format!("{domain}-calendar.ics"),
    };
    let mut response = (
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CACHE_CONTROL, cache_control.to_string()),
        ],
        ics.to_string(),
    )
        .into_response();
    if let Some(status) = cache_status {
        if let Ok(value) = status.parse() {
            response.headers_mut().insert("X-Cache-Status", value);
        }
    }
    response
}
