use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bus::{EventBus, Subscription};
use super::history::HistoryLog;
use crate::store::KvStore;

/// Default number of entity change notifications retained per entity type.
pub const DEFAULT_CHANGE_HISTORY: usize = 100;

/// Prefix of every entity-change domain; the entity type follows.
pub const ENTITY_DOMAIN_PREFIX: &str = "entities:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityChange {
    Added { record: Value },
    Updated { record: Value },
    Deleted { id: String },
    Refreshed { records: Vec<Value> },
}

impl EntityChange {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityChange::Added { .. } => "added",
            EntityChange::Updated { .. } => "updated",
            EntityChange::Deleted { .. } => "deleted",
            EntityChange::Refreshed { .. } => "refreshed",
        }
    }
}

pub fn entity_domain(entity_type: &str) -> String {
    format!("{}{}", ENTITY_DOMAIN_PREFIX, entity_type)
}

/// Change notifications for one entity type, with a capped persisted log of
/// recent changes.
#[derive(Clone)]
pub struct EntityFeed {
    domain: String,
    bus: EventBus<EntityChange>,
    history: HistoryLog<EntityChange>,
}

impl EntityFeed {
    pub fn new(
        store: &KvStore,
        bus: &EventBus<EntityChange>,
        entity_type: &str,
        cap: usize,
    ) -> Self {
        let domain = entity_domain(entity_type);
        Self {
            history: HistoryLog::new(store, &domain, cap),
            bus: bus.clone(),
            domain,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Record the change, then notify subscribers.
    pub fn publish(&self, change: EntityChange) -> usize {
        self.history.push(change.clone());
        self.bus.publish(&self.domain, &change)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<EntityChange>
    where
        F: Fn(&EntityChange) + Send + Sync + 'static,
    {
        self.bus.subscribe(&self.domain, callback)
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<EntityChange> {
        self.history.entries()
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }
}
