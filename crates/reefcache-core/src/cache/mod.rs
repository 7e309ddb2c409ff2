//! Local caches layered on the key-value store.
//!
//! This module provides:
//! - `TtlCache`: single JSON values with lazy time-to-live expiry
//! - `EntityCache`: ordered entity collections addressed through an
//!   `IdentityPolicy`, kept fresh by explicit mutation
//!
//! Both rebuild their view from the store on every call; neither holds
//! state of its own beyond its key layout.

pub mod entity;
pub mod ttl;

pub use entity::{EntityCache, EntityCollection, EntityError, IdentityPolicy, Upserted};
pub use ttl::{CacheEntry, TtlCache};
