use std::future::Future;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::decode::{is_empty_payload, Decoder};
use crate::cache::TtlCache;

/// Where a returned payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum FetchSource {
    Api,
    Cache,
}

/// Payload plus its source. Stale data served after a failed refresh is
/// tagged `Cache` with no further marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Fetched {
    pub source: FetchSource,
    pub data: Value,
}

impl Fetched {
    pub fn api(data: Value) -> Self {
        Self {
            source: FetchSource::Api,
            data,
        }
    }

    pub fn cache(data: Value) -> Self {
        Self {
            source: FetchSource::Cache,
            data,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == FetchSource::Cache
    }

    pub fn parse<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.data).context("Fetched payload has unexpected shape")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Always try the network; fall back to cache on failure.
    #[default]
    NetworkFirst,
    /// Serve usable cache without touching the network, otherwise fetch.
    CacheFirst,
    /// Never fetch. A miss yields a null payload.
    CacheOnly,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub mode: FetchMode,
    /// An empty payload (empty array/object/string, null) is not usable cache.
    pub require_non_empty: bool,
    /// Overrides the default TTL for what this call writes.
    pub ttl: Option<Duration>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` asks for cache-first behaviour.
    pub fn fetch_api(mut self, fetch_api: bool) -> Self {
        self.mode = if fetch_api {
            FetchMode::NetworkFirst
        } else {
            FetchMode::CacheFirst
        };
        self
    }

    pub fn mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn require_non_empty(mut self) -> Self {
        self.require_non_empty = true;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Orchestrates remote reads and writes against the TTL cache.
///
/// Concurrent calls for the same key are not deduplicated; whichever
/// finishes last leaves its payload in the cache.
#[derive(Clone)]
pub struct CacheSync {
    pub(super) cache: TtlCache,
    pub(super) default_ttl: Option<Duration>,
}

impl CacheSync {
    pub fn new(cache: TtlCache, default_ttl: Option<Duration>) -> Self {
        Self { cache, default_ttl }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    fn usable_cache(&self, key: &str, options: &FetchOptions) -> Option<Value> {
        let cached = self.cache.read(key)?;
        if options.require_non_empty && is_empty_payload(&cached) {
            debug!(key = key, "Cached payload is empty, not usable");
            return None;
        }
        Some(cached)
    }

    /// Serve `key` from cache or from `fetch`, per `options.mode`.
    ///
    /// A failed fetch (or decode) falls back to usable cached data when there
    /// is some; otherwise the error is returned.
    pub async fn fetch_or_cache<R, D, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        decoder: &D,
        options: &FetchOptions,
    ) -> Result<Fetched>
    where
        D: Decoder<R> + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let cached = self.usable_cache(key, options);

        match options.mode {
            FetchMode::CacheOnly => {
                debug!(key = key, hit = cached.is_some(), "Cache-only read");
                return Ok(Fetched::cache(cached.unwrap_or(Value::Null)));
            }
            FetchMode::CacheFirst => {
                if let Some(data) = cached {
                    debug!(key = key, "Serving from cache without fetch");
                    return Ok(Fetched::cache(data));
                }
            }
            FetchMode::NetworkFirst => {}
        }

        let fetched = match fetch().await {
            Ok(raw) => decoder.decode(raw).await,
            Err(e) => Err(e),
        };

        match fetched {
            Ok(data) => {
                self.cache.write(key, &data, options.ttl.or(self.default_ttl));
                Ok(Fetched::api(data))
            }
            Err(e) => match cached {
                Some(data) => {
                    warn!(key = key, error = %e, "Fetch failed, serving cached data");
                    Ok(Fetched::cache(data))
                }
                None => Err(e.context(format!("Failed to fetch {} and nothing is cached", key))),
            },
        }
    }
}
