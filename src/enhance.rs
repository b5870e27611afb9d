//! Best-effort event enrichment via the platform's details API.
//!
//! Everything here degrades to a no-op: no token, a rejected detail request,
//! or a cache failure all leave the harvested events untouched. A feed is
//! never failed for want of a description.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use subcal_core::cache::{self, CacheEntry, keys};
use subcal_core::event::{EventRecord, Location};
use subcal_core::policy;

use crate::state::AppState;
use crate::token::ApiToken;

/// Uncached detail fetches per invocation; the rest ride along unenhanced
/// and are picked up on a later harvest.
const MAX_FETCH_PER_RUN: usize = 20;
const BATCH_SIZE: usize = 5;
const BATCH_DELAY: Duration = Duration::from_millis(100);

/// Merge full descriptions, locations and timezone overrides into harvested
/// events. Order is preserved; enhancement only ever mutates fields in place.
pub async fn enhance_events(
    state: &AppState,
    mut events: Vec<EventRecord>,
    domain: &str,
) -> Vec<EventRecord> {
    if events.is_empty() {
        return events;
    }

    let Some(token) = api_token(state, domain).await else {
        debug!(domain, "no API token available, keeping basic descriptions");
        return events;
    };

    // Cached details merge immediately; the rest queue for fetching
    let mut to_fetch: Vec<(usize, String)> = Vec::new();
    for idx in 0..events.len() {
        let Some(short_code) = events[idx].short_code() else {
            continue;
        };
        match cached_details(state, domain, &short_code).await {
            Some(details) => merge_details(&mut events[idx], &details),
            None => to_fetch.push((idx, short_code)),
        }
    }

    if to_fetch.len() > MAX_FETCH_PER_RUN {
        info!(
            deferred = to_fetch.len() - MAX_FETCH_PER_RUN,
            "deferring event details to a later harvest"
        );
        to_fetch.truncate(MAX_FETCH_PER_RUN);
    }

    for batch in to_fetch.chunks(BATCH_SIZE) {
        let fetches = batch.iter().map(|(idx, short_code)| {
            let token = token.clone();
            async move {
                let details = state.upstream.fetch_event_details(short_code, &token).await?;
                Some((*idx, short_code.clone(), details))
            }
        });
        for fetched in futures::future::join_all(fetches).await.into_iter().flatten() {
            let (idx, short_code, details) = fetched;
            store_details(state, domain, &short_code, &details, &events[idx]).await;
            merge_details(&mut events[idx], &details);
        }
        tokio::time::sleep(BATCH_DELAY).await;
    }

    events
}

/// Overlay a details payload onto a harvested event. Absent detail fields
/// leave the harvested values alone.
fn merge_details(event: &mut EventRecord, details: &Value) {
    if let Some(description) = details.get("description").and_then(Value::as_str) {
        event.description = Some(description.to_string());
    }
    if let Some(text) = details.get("description_text").and_then(Value::as_str) {
        event.description_text = Some(text.to_string());
    }
    if let Some(location) = details.pointer("/_embedded/location") {
        let name = location.get("name").and_then(Value::as_str).map(str::to_string);
        let address = location.get("address").and_then(Value::as_str).map(str::to_string);
        if name.is_some() || address.is_some() {
            event.location = Some(Location::Structured { name, address });
        }
    }
    let timezone = details
        .get("time_zone")
        .or_else(|| details.get("timezone"))
        .and_then(Value::as_str);
    if let Some(tz) = timezone {
        event.timezone = Some(tz.to_string());
    }
}

async fn cached_details(state: &AppState, domain: &str, short_code: &str) -> Option<Value> {
    let key = keys::event_details(domain, short_code);
    let entry: Option<CacheEntry<Value>> = cache::get_entry(state.store.as_ref(), &key)
        .await
        .unwrap_or_else(|err| {
            warn!(%key, %err, "detail cache read failed");
            None
        });
    entry.map(|e| e.data)
}

async fn store_details(
    state: &AppState,
    domain: &str,
    short_code: &str,
    details: &Value,
    event: &EventRecord,
) {
    let now = Utc::now();
    let ttl = event
        .start
        .map(|start| policy::detail_refresh_interval(start, now))
        .unwrap_or(Duration::from_secs(3600));
    let entry = CacheEntry::new(details.clone(), domain, ttl).with_short_code(short_code);
    let key = keys::event_details(domain, short_code);
    // Detail entries expire outright at their graduated TTL; there is no
    // stale window to serve from, so soft and hard deadlines coincide.
    if let Err(err) = cache::put_entry(state.store.as_ref(), &key, &entry, ttl).await {
        warn!(%key, %err, "detail cache write failed");
    }
}

/// Fetch (or reuse) the per-tenant bearer token: cached first, otherwise
/// scraped from a sample event page's embedded widget.
async fn api_token(state: &AppState, domain: &str) -> Option<String> {
    let key = keys::api_token(domain);
    let cached: Option<CacheEntry<ApiToken>> = cache::get_entry(state.store.as_ref(), &key)
        .await
        .unwrap_or_else(|err| {
            warn!(%key, %err, "token cache read failed");
            None
        });
    let now = Utc::now();
    if let Some(entry) = cached {
        if !entry.data.is_expired(now) {
            return Some(entry.data.token);
        }
    }

    let token = scrape_token(state, domain).await?;
    let ttl_secs = (token.expires_at - now).num_seconds().max(3600);
    let soft_ttl = Duration::from_secs(ttl_secs as u64);
    let entry = CacheEntry::new(token.clone(), domain, soft_ttl);
    if let Err(err) = cache::put_entry(state.store.as_ref(), &key, &entry, soft_ttl).await {
        warn!(%key, %err, "token cache write failed");
    }
    Some(token.token)
}

async fn scrape_token(state: &AppState, domain: &str) -> Option<ApiToken> {
    let site = state.upstream.discover_site_info(domain).await?;
    let month = policy::month_key(Utc::now());
    let sample = state
        .upstream
        .fetch_events_page(domain, &site.website_id, &month, 1)
        .await
        .ok()?;
    let sample_url = sample
        .first()
        .and_then(|e| e.get("url"))
        .and_then(Value::as_str)?;

    let event_page_url = if sample_url.starts_with("http") {
        sample_url.to_string()
    } else {
        format!("{}{}", site.base_url, sample_url)
    };
    let event_html = state.upstream.fetch_text(&event_page_url).await.ok()?;
    let iframe_url = state.upstream.find_widget_iframe(&event_html)?;
    let iframe_html = state.upstream.fetch_text(iframe_url).await.ok()?;

    let token = iframe_html
        .split(r#""apiToken":""#)
        .nth(1)
        .and_then(|rest| rest.split('"').next())?;
    if token.is_empty() {
        return None;
    }
    debug!(domain, "scraped API token from widget markup");
    Some(ApiToken::new(token.to_string(), Utc::now()))
}
