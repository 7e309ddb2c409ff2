//! Client-side cache and synchronization layer.
//!
//! Cooperating stores that memoize remote API results with expiry, serve
//! stale data when the network fails, keep entity collections consistent
//! after mutations, and broadcast changes to decoupled consumers.
//!
//! - `store`: namespaced JSON key-value store over a fallible medium
//! - `cache`: TTL cache and entity-keyed collections
//! - `sync`: fetch-or-cache and mutate-and-sync orchestration
//! - `events`: per-domain event bus with capped persisted histories
//! - `auth`: session token state
//! - `api`: a `reqwest` fetch capability for hosts that want one
//! - `stores`: explicit construction and teardown of all of the above

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod events;
pub mod store;
pub mod stores;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use stores::Stores;
