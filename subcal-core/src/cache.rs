//! Cache entry shapes and the store port.
//!
//! The store is a durable key-value service with per-key TTL eviction, owned
//! by whoever runs the service; the core treats it as unreliable-but-available
//! and never assumes a key is populated. All access is whole-entry get/put -
//! concurrent refreshes of the same key may race, and the last write wins,
//! which is acceptable because entries are idempotently derivable from the
//! same upstream state.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::CoreResult;
use crate::policy::CACHE_VERSION;

/// One cached payload plus its staleness metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub metadata: EntryMeta,
}

/// Entry metadata. `refresh_after` is always >= `cached_at`; the store's own
/// hard expiry exceeds both, leaving a grace window in which stale data stays
/// servable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub cached_at: DateTime<Utc>,
    pub refresh_after: DateTime<Utc>,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub calendar_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub short_code: Option<String>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, domain: &str, soft_ttl: Duration) -> Self {
        let now = Utc::now();
        CacheEntry {
            data,
            metadata: EntryMeta {
                cached_at: now,
                refresh_after: now + chrono::Duration::from_std(soft_ttl).unwrap_or_default(),
                domain: domain.to_string(),
                month: None,
                calendar_name: None,
                short_code: None,
            },
        }
    }

    pub fn with_month(mut self, month: &str) -> Self {
        self.metadata.month = Some(month.to_string());
        self
    }

    pub fn with_calendar_name(mut self, name: &str) -> Self {
        self.metadata.calendar_name = Some(name.to_string());
        self
    }

    pub fn with_short_code(mut self, code: &str) -> Self {
        self.metadata.short_code = Some(code.to_string());
        self
    }

    /// Whether the soft deadline has not yet passed.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.metadata.refresh_after
    }
}

/// Port to the key-value store. Implementations must expire keys on their own
/// after the `hard_ttl` passed to `put`; the core never deletes explicitly.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw JSON blob stored under `key`, if the store still has it.
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Store `value` under `key`; the store evicts it after `hard_ttl`.
    async fn put(&self, key: &str, value: String, hard_ttl: Duration) -> CoreResult<()>;
}

/// Fetch and decode a typed entry. Entries that fail to decode (e.g. written
/// by an older build before a `CACHE_VERSION` bump would have split the keys)
/// are treated as absent.
pub async fn get_entry<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> CoreResult<Option<CacheEntry<T>>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(entry) => Ok(Some(entry)),
        Err(err) => {
            debug!(key, %err, "discarding undecodable cache entry");
            Ok(None)
        }
    }
}

/// Encode and store a typed entry under the store's hard TTL.
pub async fn put_entry<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    entry: &CacheEntry<T>,
    hard_ttl: Duration,
) -> CoreResult<()> {
    let raw = serde_json::to_string(entry)?;
    store.put(key, raw, hard_ttl).await
}

/// Cache key builders. Every key embeds the build-time cache-format version,
/// so bumping `CACHE_VERSION` orphans old entries without explicit deletion.
pub mod keys {
    use super::CACHE_VERSION;

    pub fn month_events(domain: &str, month: &str) -> String {
        format!("events:{domain}:{month}:v{CACHE_VERSION}")
    }

    pub fn all_events(domain: &str) -> String {
        format!("events-data:{domain}:all:v{CACHE_VERSION}")
    }

    pub fn feed(domain: &str, calendar_name: Option<&str>) -> String {
        format!("ics:{domain}:{}:v{CACHE_VERSION}", calendar_name.unwrap_or("all"))
    }

    pub fn calendars(domain: &str) -> String {
        format!("calendars:{domain}:v{CACHE_VERSION}")
    }

    pub fn api_token(domain: &str) -> String {
        format!("subsplash-token:{domain}:v{CACHE_VERSION}")
    }

    pub fn event_details(domain: &str, short_code: &str) -> String {
        format!("event-details:{domain}:{short_code}:v{CACHE_VERSION}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_refresh_after_at_least_cached_at() {
        let entry = CacheEntry::new(vec![1, 2, 3], "example.org", Duration::from_secs(3600));
        assert!(entry.metadata.refresh_after >= entry.metadata.cached_at);
        assert!(entry.is_fresh(Utc::now()));
    }

    #[test]
    fn test_entry_staleness() {
        let entry = CacheEntry::new((), "example.org", Duration::from_secs(60));
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(!entry.is_fresh(later));
    }

    #[test]
    fn test_entry_roundtrip_with_month() {
        let entry = CacheEntry::new("payload".to_string(), "example.org", Duration::from_secs(60))
            .with_month("2025-07");
        let raw = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.data, "payload");
        assert_eq!(back.metadata.month.as_deref(), Some("2025-07"));
        assert!(back.metadata.calendar_name.is_none());
    }

    #[test]
    fn test_keys_are_versioned() {
        assert_eq!(
            keys::month_events("example.org", "2025-07"),
            format!("events:example.org:2025-07:v{CACHE_VERSION}")
        );
        assert_eq!(
            keys::feed("example.org", None),
            format!("ics:example.org:all:v{CACHE_VERSION}")
        );
        assert_eq!(
            keys::feed("example.org", Some("youth")),
            format!("ics:example.org:youth:v{CACHE_VERSION}")
        );
    }
}
