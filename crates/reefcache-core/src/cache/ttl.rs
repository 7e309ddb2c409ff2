use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::store::KvStore;

/// Namespace holding TTL cache entries.
pub const CACHE_NAMESPACE: &str = "cache";

/// Persisted shape of a cached value. `expiry: None` never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct CacheEntry<T> {
    pub data: T,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    #[cfg_attr(feature = "ts", ts(type = "number | null"))]
    pub expiry: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    /// Entry written at `now` that lives for `ttl`. Zero, negative or missing
    /// TTL means no expiry, as does a TTL reaching past the representable
    /// calendar.
    pub fn new(data: T, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        let expiry = ttl
            .filter(|t| *t > Duration::zero())
            .and_then(|t| now.checked_add_signed(t));
        Self { data, expiry }
    }

    /// Stale once `now` is strictly past the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|expiry| now > expiry).unwrap_or(false)
    }

    pub fn time_to_live(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiry.map(|expiry| (expiry - now).max(Duration::zero()))
    }
}

/// Read-through TTL cache of single JSON values.
///
/// Expiry is evaluated lazily on read: an expired entry is deleted the first
/// time it is observed and reported as a miss.
#[derive(Clone)]
pub struct TtlCache {
    store: KvStore,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// `store` should be the root store; entries live in [`CACHE_NAMESPACE`].
    pub fn new(store: &KvStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: store.namespaced(CACHE_NAMESPACE),
            clock,
        }
    }

    pub fn write<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Option<Duration>) {
        let entry = CacheEntry::new(data, self.clock.now(), ttl);
        self.store.set(key, &entry);
    }

    /// Fresh entry for `key`, purging it if it has expired.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let entry: CacheEntry<Value> = self.store.get(key)?;
        if entry.is_expired(self.clock.now()) {
            debug!(key = key, "Cache entry expired, purging");
            self.store.remove(key);
            return None;
        }
        Some(entry)
    }

    pub fn read(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|entry| entry.data)
    }

    /// Typed read. A payload of the wrong shape is a miss, but is left in place.
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read(key)?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(key = key, error = %e, "Cached payload has unexpected shape");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    pub fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Drop every expired entry now rather than waiting for it to be read.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        for key in self.store.keys() {
            if let Some(entry) = self.store.get::<CacheEntry<Value>>(&key) {
                if entry.is_expired(now) {
                    self.store.remove(&key);
                    purged += 1;
                }
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryMedium, StorageMedium};
    use serde_json::json;

    fn cache() -> (Arc<MemoryMedium>, ManualClock, TtlCache) {
        let medium = Arc::new(MemoryMedium::new());
        let clock = ManualClock::at_epoch();
        let kv = KvStore::new(medium.clone());
        let cache = TtlCache::new(&kv, Arc::new(clock.clone()));
        (medium, clock, cache)
    }

    #[test]
    fn test_write_then_read_returns_value() {
        let (_, _, cache) = cache();
        cache.write("fish-list", &json!([{"id": "f1"}]), Some(Duration::minutes(5)));
        assert_eq!(cache.read("fish-list"), Some(json!([{"id": "f1"}])));
    }

    #[test]
    fn test_expired_entry_is_miss_and_purged() {
        let (medium, clock, cache) = cache();
        cache.write("k", &json!(1), Some(Duration::milliseconds(1000)));

        clock.advance(Duration::milliseconds(1000));
        assert_eq!(cache.read("k"), Some(json!(1)), "expiry instant itself is fresh");

        clock.advance(Duration::milliseconds(1));
        assert_eq!(cache.read("k"), None);
        assert_eq!(medium.get_item("reefcache:cache:k").unwrap(), None);
    }

    #[test]
    fn test_zero_or_missing_ttl_never_expires() {
        let (_, clock, cache) = cache();
        cache.write("forever", &json!("a"), None);
        cache.write("zero", &json!("b"), Some(Duration::zero()));

        clock.advance(Duration::days(3650));
        assert_eq!(cache.read("forever"), Some(json!("a")));
        assert_eq!(cache.read("zero"), Some(json!("b")));
    }

    #[test]
    fn test_ttl_past_calendar_range_never_expires() {
        let (medium, clock, cache) = cache();
        cache.write("huge", &json!([1]), Some(Duration::MAX));

        let raw = medium.get_item("reefcache:cache:huge").unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, json!({"data": [1], "expiry": null}));

        clock.advance(Duration::days(365 * 1000));
        assert_eq!(cache.read("huge"), Some(json!([1])));
    }

    #[test]
    fn test_persisted_shape_uses_epoch_millis() {
        let (medium, _, cache) = cache();
        cache.write("k", &json!({"x": 1}), Some(Duration::milliseconds(300000)));
        let raw = medium.get_item("reefcache:cache:k").unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, json!({"data": {"x": 1}, "expiry": 300000}));

        cache.write("n", &json!(null), None);
        let raw = medium.get_item("reefcache:cache:n").unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, json!({"data": null, "expiry": null}));
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let (medium, _, cache) = cache();
        medium.set_item("reefcache:cache:k", "[[[").unwrap();
        assert_eq!(cache.read("k"), None);
    }

    #[test]
    fn test_read_as_typed() {
        let (_, _, cache) = cache();
        cache.write("ids", &vec!["a", "b"], None);
        assert_eq!(cache.read_as::<Vec<String>>("ids"), Some(vec!["a".into(), "b".into()]));
        assert_eq!(cache.read_as::<u64>("ids"), None);
        assert!(cache.contains("ids"));
    }

    #[test]
    fn test_purge_expired_only_drops_stale_entries() {
        let (_, clock, cache) = cache();
        cache.write("short", &json!(1), Some(Duration::seconds(1)));
        cache.write("long", &json!(2), Some(Duration::hours(1)));
        clock.advance(Duration::seconds(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.keys(), vec!["long".to_string()]);
    }

    #[test]
    fn test_time_to_live_saturates_at_zero() {
        let entry = CacheEntry::new(1, DateTime::<Utc>::default(), Some(Duration::seconds(10)));
        let later = DateTime::<Utc>::default() + Duration::seconds(30);
        assert_eq!(entry.time_to_live(later), Some(Duration::zero()));
        assert!(entry.is_expired(later));
    }
}
