use std::future::Future;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use super::decode::Decoder;
use super::fetch::Fetched;
use crate::cache::{EntityCache, Upserted};
use crate::events::{EntityChange, EntityFeed};

/// Remote writes for one entity type, reconciled into its [`EntityCache`]
/// and announced on its [`EntityFeed`].
#[derive(Clone)]
pub struct EntitySync {
    cache: EntityCache,
    feed: EntityFeed,
}

impl EntitySync {
    pub fn new(cache: EntityCache, feed: EntityFeed) -> Self {
        Self { cache, feed }
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn feed(&self) -> &EntityFeed {
        &self.feed
    }

    async fn run<R, D, F, Fut>(mutate: F, decoder: &D) -> Result<Value>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let raw = mutate().await?;
        decoder.decode(raw).await
    }

    /// Apply a returned record to the cache and announce it. A record the
    /// identity policy cannot place is logged and left out of the cache.
    fn reconcile(&self, record: &Value) {
        match self.cache.upsert(record.clone()) {
            Ok(Upserted::Inserted) => {
                self.feed.publish(EntityChange::Added {
                    record: record.clone(),
                });
            }
            Ok(Upserted::Updated) => {
                let merged = self
                    .cache
                    .policy()
                    .resolve(record)
                    .and_then(|id| self.cache.find_by_id(&id))
                    .unwrap_or_else(|| record.clone());
                self.feed.publish(EntityChange::Updated { record: merged });
            }
            Err(e) => {
                warn!(entity = %self.cache.entity_type(), error = %e, "Mutation result not cached");
            }
        }
    }

    /// Remote create. The returned record is upserted (an already-known id is
    /// merged rather than duplicated).
    pub async fn create<R, D, F, Fut>(&self, mutate: F, decoder: &D) -> Result<Value>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let record = Self::run(mutate, decoder).await?;
        self.reconcile(&record);
        Ok(record)
    }

    /// Remote update. Same reconciliation as [`create`](Self::create).
    pub async fn update<R, D, F, Fut>(&self, mutate: F, decoder: &D) -> Result<Value>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let record = Self::run(mutate, decoder).await?;
        self.reconcile(&record);
        Ok(record)
    }

    /// Remote delete of `id`. The local copy goes only once the remote call
    /// succeeds, and `Deleted` is announced only if there was a local copy.
    pub async fn delete<R, D, F, Fut>(&self, id: &str, mutate: F, decoder: &D) -> Result<Value>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let result = Self::run(mutate, decoder).await?;
        let removed = self.cache.remove_by_id(id);
        debug!(entity = %self.cache.entity_type(), id = id, removed = removed, "Deleted entity");
        if removed > 0 {
            self.feed.publish(EntityChange::Deleted { id: id.to_string() });
        }
        Ok(result)
    }

    /// Replace the collection with a fresh list. On failure the current
    /// collection is served when it has anything in it.
    pub async fn refresh<R, D, F, Fut>(&self, fetch: F, decoder: &D) -> Result<Fetched>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let fetched = Self::run(fetch, decoder).await.and_then(|value| match value {
            Value::Array(records) => Ok(records),
            other => Err(anyhow::anyhow!(
                "Expected a list of {} records, got {}",
                self.cache.entity_type(),
                json_kind(&other)
            )),
        });

        match fetched {
            Ok(records) => {
                let records = self.cache.replace_all(records);
                self.feed.publish(EntityChange::Refreshed {
                    records: records.clone(),
                });
                Ok(Fetched::api(Value::Array(records)))
            }
            Err(e) => {
                let cached = self.cache.list();
                if cached.is_empty() {
                    return Err(e);
                }
                warn!(
                    entity = %self.cache.entity_type(),
                    error = %e,
                    "Refresh failed, serving cached records"
                );
                Ok(Fetched::cache(Value::Array(cached)))
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
