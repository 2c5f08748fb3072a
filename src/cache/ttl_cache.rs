//! Generic keyed store with TTL expiry.
//!
//! Used twice with independent instances: prompt templates (longer TTL) and
//! full structured explanation responses. Entries are bounded only by TTL
//! expiry and key-space cardinality; there is no capacity-based eviction and
//! no TTL refresh on read (it is not an LRU).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

/// A single cached value with its storage timestamp.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at_millis: u64,
}

/// Keyed store whose entries expire a fixed duration after insertion.
///
/// Interior mutability via a `Mutex` so one instance can be shared across
/// request handlers on a multi-threaded runtime. Lock sections are short and
/// never held across an await point.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl_millis: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_millis: ttl_secs.saturating_mul(1000),
        }
    }

    /// Look up a value. Returns `None` if the key is absent or expired.
    ///
    /// An expired entry is removed as a side effect of the read. A hit does
    /// not refresh the entry's timestamp.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = now_millis();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if now.saturating_sub(entry.stored_at_millis) > self.ttl_millis => {
                debug!(key, "cache entry expired, removing");
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value, unconditionally overwriting any existing entry with a
    /// freshly timestamped one.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            stored_at_millis: now_millis(),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.into(), entry);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    /// Number of entries currently stored, including any not yet swept
    /// expired ones.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().expect("cache lock poisoned").is_empty()
    }

    /// Shift an entry's storage timestamp into the past. Test-only clock
    /// control so expiry can be exercised without sleeping.
    #[cfg(test)]
    fn backdate(&self, key: &str, millis: u64) {
        if let Some(entry) = self
            .entries
            .lock()
            .expect("cache lock poisoned")
            .get_mut(key)
        {
            entry.stored_at_millis = entry.stored_at_millis.saturating_sub(millis);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
