//! Explicitly constructed set of cooperating stores.
//!
//! A host builds one `Stores` at start-up and hands it (or pieces of it) to
//! its consumers, then calls `shutdown` on the way out. Nothing here is
//! global, so tests can build as many isolated instances as they like.

use std::sync::Arc;

use tracing::info;

use crate::auth::TokenStore;
use crate::cache::{EntityCache, IdentityPolicy, TtlCache};
use crate::clock::Clock;
use crate::config::Config;
use crate::events::{EntityChange, EntityFeed, EventBus, MessageEvent, MessageLog};
use crate::store::{KvStore, StorageMedium};
use crate::sync::{CacheSync, EntitySync};

#[derive(Clone)]
pub struct Stores {
    kv: KvStore,
    sync: CacheSync,
    tokens: TokenStore,
    entity_bus: EventBus<EntityChange>,
    message_bus: EventBus<MessageEvent>,
    messages: MessageLog,
    change_history: usize,
}

impl Stores {
    pub fn open(config: &Config, medium: Arc<dyn StorageMedium>, clock: Arc<dyn Clock>) -> Self {
        let kv = KvStore::with_prefix(medium, config.storage_prefix.clone());
        let cache = TtlCache::new(&kv, Arc::clone(&clock));
        let entity_bus = EventBus::new();
        let message_bus = EventBus::new();
        let messages = MessageLog::new(
            &kv,
            &message_bus,
            Arc::clone(&clock),
            config.message_history,
        );

        info!(prefix = %kv.prefix(), "Stores opened");
        Self {
            sync: CacheSync::new(cache, config.cache_ttl()),
            tokens: TokenStore::new(&kv, clock),
            kv,
            entity_bus,
            message_bus,
            messages,
            change_history: config.change_history,
        }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn cache(&self) -> &TtlCache {
        self.sync.cache()
    }

    pub fn sync(&self) -> &CacheSync {
        &self.sync
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn entity_bus(&self) -> &EventBus<EntityChange> {
        &self.entity_bus
    }

    /// Cache, change feed and sync facade for one entity type.
    pub fn entity(&self, entity_type: &str, policy: IdentityPolicy) -> EntitySync {
        let cache = EntityCache::new(&self.kv, entity_type, policy);
        let feed = EntityFeed::new(&self.kv, &self.entity_bus, entity_type, self.change_history);
        EntitySync::new(cache, feed)
    }

    /// Logout: session state goes, cached data stays.
    pub fn logout(&self) {
        self.tokens.clear();
    }

    /// Drop every subscriber. Persisted data is untouched.
    pub fn shutdown(&self) {
        self.entity_bus.clear();
        self.message_bus.clear();
        info!("Stores shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::EntityChange;
    use crate::store::MemoryMedium;
    use crate::sync::{FetchOptions, FetchSource, Passthrough};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Mutex;

    fn open_with(config: &Config) -> (ManualClock, Stores) {
        let clock = ManualClock::at_epoch();
        let medium = Arc::new(MemoryMedium::new());
        let stores = Stores::open(config, medium, Arc::new(clock.clone()));
        (clock, stores)
    }

    fn open() -> (ManualClock, Stores) {
        open_with(&Config::default())
    }

    #[test]
    fn test_instances_are_isolated() {
        let (_, a) = open();
        let (_, b) = open();
        a.cache().write("k", &json!(1), None);
        assert_eq!(b.cache().read("k"), None);
    }

    #[tokio::test]
    async fn test_fetch_uses_configured_default_ttl() {
        let (clock, stores) = open();
        let result = stores
            .sync()
            .fetch_or_cache(
                "fish-list",
                || async { Ok::<_, anyhow::Error>(json!([1])) },
                &Passthrough,
                &FetchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.source, FetchSource::Api);

        clock.advance(Duration::minutes(5) + Duration::milliseconds(1));
        assert_eq!(stores.cache().read("fish-list"), None);
    }

    #[tokio::test]
    async fn test_unbounded_configured_ttl_caches_without_expiry() {
        let config = Config {
            cache_ttl_ms: u64::MAX,
            ..Config::default()
        };
        let (clock, stores) = open_with(&config);
        let result = stores
            .sync()
            .fetch_or_cache(
                "k",
                || async { Ok::<_, anyhow::Error>(json!([1])) },
                &Passthrough,
                &FetchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, crate::sync::Fetched::api(json!([1])));

        clock.advance(Duration::days(365 * 1000));
        let entry = stores.cache().entry("k").unwrap();
        assert_eq!(entry.expiry, None);
        assert_eq!(entry.data, json!([1]));
    }

    #[tokio::test]
    async fn test_entity_mutation_reaches_bus_subscribers() {
        let (_, stores) = open();
        let fish = stores.entity("fish", IdentityPolicy::with_fallback("fishId", "fish_id"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let _sub = stores.entity_bus().subscribe("entities:fish", move |c: &EntityChange| {
            seen2.lock().unwrap().push(c.kind())
        });

        fish.create(|| async { Ok::<_, anyhow::Error>(json!({"fishId": "f1"})) }, &Passthrough)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["added"]);
        // A second handle for the same type sees the same persisted records
        let again = stores.entity("fish", IdentityPolicy::with_fallback("fishId", "fish_id"));
        assert_eq!(again.cache().len(), 1);
    }

    #[test]
    fn test_shutdown_drops_subscribers_and_logout_keeps_cache() {
        let (_, stores) = open();
        let sub = stores.messages().subscribe(|_| {});
        stores.cache().write("k", &json!(1), None);
        stores.tokens().set_tokens("t", Duration::minutes(1), None);

        stores.logout();
        stores.shutdown();

        assert!(!sub.is_active());
        assert!(!stores.tokens().is_authenticated());
        assert_eq!(stores.cache().read("k"), Some(json!(1)));
    }
}
