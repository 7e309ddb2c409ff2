use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::store::KvStore;

/// Namespace holding persisted channel histories.
pub const HISTORY_NAMESPACE: &str = "history";

/// Persisted, capped, append-only list (JSON array) for one domain.
/// Once the cap is exceeded the oldest entries are dropped first.
#[derive(Clone)]
pub struct HistoryLog<T> {
    store: KvStore,
    key: String,
    cap: usize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> HistoryLog<T> {
    pub fn new(store: &KvStore, domain: &str, cap: usize) -> Self {
        Self {
            store: store.namespaced(HISTORY_NAMESPACE),
            key: domain.to_string(),
            cap,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<T> {
        self.store.get(&self.key).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Append and trim; returns how many old entries were dropped.
    pub fn push(&self, entry: T) -> usize {
        let mut entries = self.entries();
        entries.push(entry);
        let dropped = entries.len().saturating_sub(self.cap);
        if dropped > 0 {
            entries.drain(..dropped);
            debug!(domain = %self.key, dropped = dropped, "History cap reached, dropped oldest");
        }
        self.save(&entries);
        dropped
    }

    /// Rewrite entries in place. Returns the first entry `apply` changed.
    pub fn update<F>(&self, mut apply: F) -> Option<T>
    where
        F: FnMut(&mut T) -> bool,
        T: Clone,
    {
        let mut entries = self.entries();
        let mut changed = None;
        for entry in entries.iter_mut() {
            if apply(entry) {
                changed = Some(entry.clone());
                break;
            }
        }
        if changed.is_some() {
            self.save(&entries);
        }
        changed
    }

    pub fn clear(&self) {
        self.store.remove(&self.key);
    }

    fn save(&self, entries: &[T]) {
        self.store.set(&self.key, entries);
    }
}
