//! Conversation message log.
//!
//! Messages are persisted (capped, oldest dropped first) and every change is
//! announced on the `messages` domain so independent views stay in step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bus::{EventBus, Subscription};
use super::history::HistoryLog;
use crate::clock::Clock;
use crate::store::KvStore;

/// Domain for conversation notifications.
pub const MESSAGES_DOMAIN: &str = "messages";

/// Default number of retained messages.
pub const DEFAULT_MESSAGE_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageEvent {
    Added { message: ChatMessage },
    Updated { message: ChatMessage },
    Cleared,
}

#[derive(Clone)]
pub struct MessageLog {
    bus: EventBus<MessageEvent>,
    history: HistoryLog<ChatMessage>,
    clock: Arc<dyn Clock>,
    seq: Arc<AtomicU64>,
}

impl MessageLog {
    pub fn new(
        store: &KvStore,
        bus: &EventBus<MessageEvent>,
        clock: Arc<dyn Clock>,
        cap: usize,
    ) -> Self {
        Self {
            bus: bus.clone(),
            history: HistoryLog::new(store, MESSAGES_DOMAIN, cap),
            clock,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.history.entries()
    }

    /// Create and append a message with a fresh id.
    pub fn add(&self, role: &str, content: &str) -> ChatMessage {
        let now = self.clock.now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let message = ChatMessage {
            id: format!("msg-{}-{}", now.timestamp_millis(), seq),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now,
        };
        self.push(message.clone());
        message
    }

    /// Append an existing message (e.g. one received from the server).
    pub fn push(&self, message: ChatMessage) {
        self.history.push(message.clone());
        self.bus.publish(MESSAGES_DOMAIN, &MessageEvent::Added { message });
    }

    /// Replace the content of message `id`. `None` if it is not retained.
    pub fn update(&self, id: &str, content: &str) -> Option<ChatMessage> {
        let updated = self.history.update(|m| {
            if m.id == id {
                m.content = content.to_string();
                true
            } else {
                false
            }
        })?;
        self.bus.publish(
            MESSAGES_DOMAIN,
            &MessageEvent::Updated {
                message: updated.clone(),
            },
        );
        Some(updated)
    }

    pub fn clear(&self) {
        self.history.clear();
        self.bus.publish(MESSAGES_DOMAIN, &MessageEvent::Cleared);
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<MessageEvent>
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(MESSAGES_DOMAIN, callback)
    }
}
