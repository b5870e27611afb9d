//! Event harvesting: month paging, the cached month layer, and the full and
//! sample fan-outs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, warn};

use subcal_core::cache::{self, CacheEntry, keys};
use subcal_core::event::EventRecord;
use subcal_core::policy;

use crate::enhance;
use crate::state::AppState;
use crate::upstream::{PAGE_SIZE, SiteInfo};

/// Months sampled during calendar discovery.
const SAMPLE_MONTHS: u32 = 3;
const SAMPLE_PER_MONTH: usize = 30;
const SAMPLE_TARGET: usize = 80;

/// Fetch and normalize every event in a month, paging until a short page or
/// `max_events`. A failure on the first page propagates so callers can fall
/// back to cached data; a failure on a later page ends pagination with what
/// was already collected.
pub async fn fetch_month_events(
    state: &AppState,
    site: &SiteInfo,
    month: &str,
    max_events: Option<usize>,
) -> Result<Vec<EventRecord>> {
    let mut events: Vec<EventRecord> = Vec::new();
    let mut page: u32 = 1;

    loop {
        let raw = match state
            .upstream
            .fetch_events_page(&site.domain, &site.website_id, month, page)
            .await
        {
            Ok(raw) => raw,
            Err(err) if page == 1 => return Err(err),
            Err(err) => {
                warn!(month, page, %err, "page fetch failed, keeping earlier pages");
                break;
            }
        };

        let page_len = raw.len();
        events.extend(raw.iter().map(|r| EventRecord::from_raw(r, &site.base_url)));

        if let Some(max) = max_events {
            if events.len() >= max {
                events.truncate(max);
                break;
            }
        }
        if page_len < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    debug!(month, count = events.len(), "month harvest complete");
    Ok(events)
}

/// Month events through the cache: fresh entries short-circuit, stale entries
/// trigger a refresh and survive a failed one.
pub async fn month_events_cached(state: &AppState, site: &SiteInfo, month: &str) -> Vec<EventRecord> {
    let key = keys::month_events(&site.domain, month);
    let cached: Option<CacheEntry<Vec<EventRecord>>> =
        match cache::get_entry(state.store.as_ref(), &key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%key, %err, "cache read failed");
                None
            }
        };

    if let Some(entry) = &cached {
        if entry.is_fresh(Utc::now()) {
            return entry.data.clone();
        }
    }

    match fetch_month_events(state, site, month, None).await {
        Ok(events) => {
            store_month(state, site, month, &events).await;
            events
        }
        Err(err) => match cached {
            Some(entry) => {
                warn!(month, %err, "refresh failed, serving stale month data");
                entry.data
            }
            None => {
                error!(month, %err, "month fetch failed with no cached fallback");
                Vec::new()
            }
        },
    }
}

async fn store_month(state: &AppState, site: &SiteInfo, month: &str, events: &[EventRecord]) {
    // Empty months are not cached; a transiently empty response should not
    // mask events for a whole refresh interval.
    if events.is_empty() {
        return;
    }
    let offset = policy::month_offset(month, Utc::now());
    let soft_ttl = policy::with_jitter(policy::month_refresh_interval(offset));
    let entry = CacheEntry::new(events.to_vec(), &site.domain, soft_ttl).with_month(month);
    let key = keys::month_events(&site.domain, month);
    if let Err(err) = cache::put_entry(state.store.as_ref(), &key, &entry, policy::HARD_TTL).await {
        warn!(%key, %err, "cache write failed");
    }
}

/// Full harvest: the current month plus twelve ahead, fetched concurrently
/// under the month-permit bound, flattened, sorted, then enhanced.
pub async fn fetch_all_events(state: &AppState, site: &SiteInfo) -> Vec<EventRecord> {
    let months = policy::month_window(Utc::now(), 12);

    let fetches = months.iter().map(|month| async {
        let Ok(_permit) = state.month_permits.acquire().await else {
            return Vec::new();
        };
        month_events_cached(state, site, month).await
    });

    let mut events: Vec<EventRecord> = join_all(fetches).await.into_iter().flatten().collect();
    sort_by_start(&mut events);

    enhance::enhance_events(state, events, &site.domain).await
}

/// Discovery harvest: a few months of samples, enough to enumerate calendars
/// without paging through a year.
pub async fn sample_events(state: &AppState, site: &SiteInfo) -> Vec<EventRecord> {
    let months = policy::month_window(Utc::now(), SAMPLE_MONTHS);
    let mut events: Vec<EventRecord> = Vec::new();

    for month in &months {
        match fetch_month_events(state, site, month, Some(SAMPLE_PER_MONTH)).await {
            Ok(month_events) => {
                debug!(month, count = month_events.len(), "sampled month");
                events.extend(month_events);
            }
            Err(err) => warn!(month, %err, "sample fetch failed, skipping month"),
        }
        if events.len() >= SAMPLE_TARGET {
            break;
        }
    }

    sort_by_start(&mut events);
    events
}

fn sort_by_start(events: &mut [EventRecord]) {
    // Unparsable starts sort last; they are dropped at encode time anyway
    events.sort_by_key(|e| e.start.unwrap_or(DateTime::<Utc>::MAX_UTC));
}
