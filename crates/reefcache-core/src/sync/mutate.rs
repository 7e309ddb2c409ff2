use std::future::Future;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::decode::Decoder;
use super::fetch::CacheSync;

impl CacheSync {
    /// Run a remote write, then reconcile the cached collection at `key`.
    ///
    /// `update` receives the current collection (empty if nothing is cached)
    /// and the decoded mutation result. Returning `Some` persists the new
    /// collection with the default TTL; `None` leaves the cache untouched.
    /// The decoded result is returned whatever happens to the cache. A failed
    /// mutation is returned as an error and the cache is not touched.
    pub async fn mutate_and_sync<R, D, F, Fut, U>(
        &self,
        key: &str,
        mutate: F,
        decoder: &D,
        update: U,
    ) -> Result<Value>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
        U: FnOnce(Vec<Value>, &Value) -> Option<Vec<Value>>,
    {
        let raw = mutate().await?;
        let result = decoder.decode(raw).await?;

        let current: Vec<Value> = self.cache.read_as(key).unwrap_or_default();
        match update(current, &result) {
            Some(collection) => {
                debug!(key = key, len = collection.len(), "Synced collection after mutation");
                self.cache.write(key, &collection, self.default_ttl);
            }
            None => debug!(key = key, "Update declined, cache left as is"),
        }

        Ok(result)
    }
}
