use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::medium::StorageMedium;

/// Default prefix applied to every key this crate writes.
pub const DEFAULT_PREFIX: &str = "reefcache:";

/// Separator between a namespace and the keys beneath it.
const NAMESPACE_SEPARATOR: char = ':';

/// Namespaced JSON key-value store over a [`StorageMedium`].
///
/// Every failure of the medium is contained here: writes that the medium
/// rejects are dropped, reads that fail or do not parse come back as `None`.
/// Clone is cheap; clones share the medium.
#[derive(Clone)]
pub struct KvStore {
    medium: Arc<dyn StorageMedium>,
    prefix: String,
}

impl KvStore {
    pub fn new(medium: Arc<dyn StorageMedium>) -> Self {
        Self::with_prefix(medium, DEFAULT_PREFIX)
    }

    pub fn with_prefix(medium: Arc<dyn StorageMedium>, prefix: impl Into<String>) -> Self {
        Self {
            medium,
            prefix: prefix.into(),
        }
    }

    /// A view of this store narrowed to `namespace`, sharing the medium.
    pub fn namespaced(&self, namespace: &str) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
            prefix: format!("{}{}{}", self.prefix, namespace, NAMESPACE_SEPARATOR),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = key, error = %e, "Discarding unreadable stored value");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, &raw),
            Err(e) => warn!(key = key, error = %e, "Failed to serialize value, write dropped"),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        match self.medium.get_item(&self.full_key(key)) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Storage read failed");
                None
            }
        }
    }

    pub fn set_raw(&self, key: &str, raw: &str) {
        if let Err(e) = self.medium.set_item(&self.full_key(key), raw) {
            warn!(key = key, error = %e, "Storage write rejected, write dropped");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.medium.remove_item(&self.full_key(key)) {
            warn!(key = key, error = %e, "Storage remove failed");
        }
    }

    /// Logical keys under this store's prefix.
    pub fn keys(&self) -> Vec<String> {
        match self.medium.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Storage key listing failed");
                Vec::new()
            }
        }
    }

    /// Remove every key under this store's prefix.
    pub fn clear(&self) {
        let keys = self.keys();
        let count = keys.len();
        for key in keys {
            self.remove(&key);
        }
        debug!(prefix = %self.prefix, count = count, "Cleared namespace");
    }

    /// Remove every key under `namespace`, leaving the rest of the store alone.
    pub fn clear_namespace(&self, namespace: &str) {
        self.namespaced(namespace).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMedium;
    use serde_json::{json, Value};

    fn store() -> (Arc<MemoryMedium>, KvStore) {
        let medium = Arc::new(MemoryMedium::new());
        let kv = KvStore::new(medium.clone());
        (medium, kv)
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let (_, kv) = store();
        kv.set("fish", &json!({"name": "clownfish"}));
        assert_eq!(kv.get::<Value>("fish"), Some(json!({"name": "clownfish"})));
    }

    #[test]
    fn test_keys_are_prefixed_in_medium() {
        let (medium, kv) = store();
        kv.namespaced("cache").set("fish-list", &vec![1, 2]);
        assert_eq!(
            medium.get_item("reefcache:cache:fish-list").unwrap().as_deref(),
            Some("[1,2]")
        );
    }

    #[test]
    fn test_corrupt_json_reads_as_absent() {
        let (medium, kv) = store();
        medium.set_item("reefcache:broken", "{not json").unwrap();
        assert_eq!(kv.get::<Value>("broken"), None);
        // Raw access still sees the bytes
        assert_eq!(kv.get_raw("broken").as_deref(), Some("{not json"));
    }

    #[test]
    fn test_wrong_shape_reads_as_absent() {
        let (_, kv) = store();
        kv.set("n", &"text");
        assert_eq!(kv.get::<u32>("n"), None);
    }

    #[test]
    fn test_rejected_write_is_silent_noop() {
        let kv = KvStore::new(Arc::new(MemoryMedium::with_quota(8)));
        kv.set("big", &"x".repeat(100));
        assert_eq!(kv.get::<String>("big"), None);
    }

    #[test]
    fn test_disabled_medium_never_surfaces_errors() {
        let kv = KvStore::new(Arc::new(MemoryMedium::disabled()));
        kv.set("k", &1);
        assert_eq!(kv.get::<i32>("k"), None);
        kv.remove("k");
        kv.clear();
        assert!(kv.keys().is_empty());
    }

    #[test]
    fn test_remove_and_clear_are_idempotent() {
        let (_, kv) = store();
        kv.set("a", &1);
        kv.remove("a");
        kv.remove("a");
        assert_eq!(kv.get::<i32>("a"), None);
        kv.clear();
        kv.clear();
    }

    #[test]
    fn test_clear_namespace_only_touches_that_namespace() {
        let (medium, kv) = store();
        medium.set_item("unrelated", "keep").unwrap();
        kv.namespaced("cache").set("a", &1);
        kv.namespaced("cache").set("b", &2);
        kv.namespaced("session").set("access_token", &"t");

        kv.clear_namespace("cache");

        assert!(kv.namespaced("cache").keys().is_empty());
        assert_eq!(kv.namespaced("session").get::<String>("access_token").as_deref(), Some("t"));
        assert_eq!(medium.get_item("unrelated").unwrap().as_deref(), Some("keep"));
    }

    #[test]
    fn test_namespace_prefix_does_not_match_sibling_names() {
        let (_, kv) = store();
        kv.namespaced("cache").set("a", &1);
        kv.namespaced("cache2").set("a", &2);
        kv.clear_namespace("cache");
        assert_eq!(kv.namespaced("cache2").get::<i32>("a"), Some(2));
    }

    #[test]
    fn test_clear_leaves_other_prefixes_alone() {
        let medium: Arc<dyn StorageMedium> = Arc::new(MemoryMedium::new());
        let ours = KvStore::new(medium.clone());
        let theirs = KvStore::with_prefix(medium, "other-app:");
        ours.set("k", &1);
        theirs.set("k", &2);

        ours.clear();

        assert_eq!(ours.get::<i32>("k"), None);
        assert_eq!(theirs.get::<i32>("k"), Some(2));
    }
}
