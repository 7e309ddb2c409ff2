//! Entity-keyed collections.
//!
//! Records are JSON objects whose identifier may live under any of several
//! field names depending on which endpoint produced them. The candidate
//! names are declared once per entity type in an [`IdentityPolicy`], and
//! every read and write path resolves identity through it. Resolving
//! identity differently on two paths is how duplicate "ghost" records creep
//! into a collection.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::store::KvStore;

/// Namespace holding entity collections.
pub const ENTITY_NAMESPACE: &str = "entities";

/// Generic identifier field checked last by most policies.
pub const GENERIC_ID_FIELD: &str = "id";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("Entity record is not a JSON object")]
    NotAnObject,

    #[error("Entity record has no identifier under any of: {0}")]
    MissingIdentifier(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

/// Ordered candidate identifier fields for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPolicy {
    fields: Vec<String>,
}

impl IdentityPolicy {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Domain primary key, then an alias, then the generic `id`.
    pub fn with_fallback(primary: &str, alias: &str) -> Self {
        Self::new([primary, alias, GENERIC_ID_FIELD])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// First non-empty candidate value, as a string.
    pub fn resolve(&self, record: &Value) -> Option<String> {
        self.resolve_fields(record.as_object()?)
    }

    fn resolve_fields(&self, object: &Map<String, Value>) -> Option<String> {
        self.fields
            .iter()
            .find_map(|field| object.get(field).and_then(identifier_text))
    }

    /// True if `id` appears under any candidate field of `record`.
    pub fn matches(&self, record: &Value, id: &str) -> bool {
        let Some(object) = record.as_object() else {
            return false;
        };
        self.fields
            .iter()
            .filter_map(|field| object.get(field).and_then(identifier_text))
            .any(|candidate| candidate == id)
    }
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self::new([GENERIC_ID_FIELD])
    }
}

/// Strings and integers count as identifiers; empty strings do not.
fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Shallow merge: fields of `update` win, fields only in `target` survive.
fn merge_fields(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (field, value) in update {
        target.insert(field, value);
    }
}

/// In-memory ordered collection with identity-aware operations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCollection<'p> {
    policy: &'p IdentityPolicy,
    records: Vec<Value>,
}

impl<'p> EntityCollection<'p> {
    pub fn new(policy: &'p IdentityPolicy, records: Vec<Value>) -> Self {
        Self { policy, records }
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn upsert(&mut self, record: Value) -> Result<Upserted, EntityError> {
        let Value::Object(fields) = record else {
            return Err(EntityError::NotAnObject);
        };
        let id = self
            .policy
            .resolve_fields(&fields)
            .ok_or_else(|| EntityError::MissingIdentifier(self.policy.fields.join(", ")))?;

        let policy = self.policy;
        let existing = self
            .records
            .iter_mut()
            .find(|r| policy.resolve(r).as_deref() == Some(id.as_str()));

        match existing {
            Some(Value::Object(target)) => {
                merge_fields(target, fields);
                Ok(Upserted::Updated)
            }
            _ => {
                self.records.push(Value::Object(fields));
                Ok(Upserted::Inserted)
            }
        }
    }

    /// Returns how many records were dropped.
    pub fn remove_by_id(&mut self, id: &str) -> usize {
        let before = self.records.len();
        let policy = self.policy;
        self.records.retain(|r| !policy.matches(r, id));
        before - self.records.len()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Value> {
        self.records.iter().find(|r| self.policy.matches(r, id))
    }
}

/// Entity collection persisted as a raw JSON array, kept fresh by explicit
/// mutation rather than expiry.
#[derive(Clone)]
pub struct EntityCache {
    store: KvStore,
    key: String,
    policy: IdentityPolicy,
}

impl EntityCache {
    /// `store` should be the root store; the collection lives at
    /// `entities:<entity_type>`.
    pub fn new(store: &KvStore, entity_type: &str, policy: IdentityPolicy) -> Self {
        Self {
            store: store.namespaced(ENTITY_NAMESPACE),
            key: entity_type.to_string(),
            policy,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &IdentityPolicy {
        &self.policy
    }

    /// Current records; a missing or unreadable collection is empty.
    pub fn list(&self) -> Vec<Value> {
        self.store.get(&self.key).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    fn save(&self, records: &[Value]) {
        self.store.set(&self.key, records);
    }

    pub fn upsert(&self, record: Value) -> Result<Upserted, EntityError> {
        let mut collection = EntityCollection::new(&self.policy, self.list());
        let outcome = collection.upsert(record)?;
        self.save(collection.records());
        debug!(entity = %self.key, ?outcome, "Upserted entity");
        Ok(outcome)
    }

    pub fn remove_by_id(&self, id: &str) -> usize {
        let mut collection = EntityCollection::new(&self.policy, self.list());
        let removed = collection.remove_by_id(id);
        if removed > 0 {
            self.save(collection.records());
        }
        removed
    }

    pub fn find_by_id(&self, id: &str) -> Option<Value> {
        let collection = EntityCollection::new(&self.policy, self.list());
        collection.find_by_id(id).cloned()
    }

    /// Replace the whole collection. Records without an identifier are
    /// dropped and repeated identifiers are merged into the first occurrence.
    pub fn replace_all(&self, records: Vec<Value>) -> Vec<Value> {
        let mut collection = EntityCollection::new(&self.policy, Vec::new());
        for record in records {
            if let Err(e) = collection.upsert(record) {
                debug!(entity = %self.key, error = %e, "Skipping record during refresh");
            }
        }
        let records = collection.into_records();
        self.save(&records);
        records
    }

    pub fn clear(&self) {
        self.store.remove(&self.key);
    }
}
