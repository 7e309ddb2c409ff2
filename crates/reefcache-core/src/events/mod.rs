//! Change notifications without a central coordinator.
//!
//! This module provides:
//! - `EventBus`: synchronous per-domain publish/subscribe
//! - `HistoryLog`: capped persisted history backing a domain
//! - `EntityFeed`: added/updated/deleted/refreshed notices per entity type
//! - `MessageLog`: conversation messages with added/updated/cleared notices

pub mod bus;
pub mod entity;
pub mod history;
pub mod messages;

pub use bus::{EventBus, Subscription};
pub use entity::{entity_domain, EntityChange, EntityFeed, DEFAULT_CHANGE_HISTORY};
pub use history::HistoryLog;
pub use messages::{ChatMessage, MessageEvent, MessageLog, DEFAULT_MESSAGE_HISTORY, MESSAGES_DOMAIN};
