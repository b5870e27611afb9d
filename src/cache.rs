//! In-process implementation of the cache-store port.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use subcal_core::cache::CacheStore;
use subcal_core::CoreResult;

/// Expiring in-memory key-value store. Entries past their hard TTL are
/// dropped lazily on access, so a quiet key lingers until the next `put`
/// sweeps it.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut entries = lock(&self.entries);
        if let Some(stored) = entries.get(key) {
            if stored.expires_at <= Instant::now() {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(stored.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, hard_ttl: Duration) -> CoreResult<()> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, stored| stored.expires_at > now);
        entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: now + hard_ttl,
            },
        );
        Ok(())
    }
}

// A poisoned lock means another thread panicked mid-write; the map holds
// only whole values, so continuing with its contents is safe.
fn lock(entries: &Mutex<HashMap<String, StoredValue>>) -> std::sync::MutexGuard<'_, HashMap<String, StoredValue>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
