//! Namespaced key-value persistence.
//!
//! This module provides:
//! - `StorageMedium`: the raw, fallible string storage (memory or directory)
//! - `KvStore`: JSON get/set/remove/clear over a medium, with every storage
//!   failure contained (a failed write is a no-op, a failed read is a miss)
//!
//! The store owns the persisted bytes. Everything above it rebuilds its view
//! on each read and never assumes the bytes survive a restart.

pub mod kv;
pub mod medium;

pub use kv::{KvStore, DEFAULT_PREFIX};
pub use medium::{FileMedium, MemoryMedium, StorageError, StorageMedium, StorageResult};
