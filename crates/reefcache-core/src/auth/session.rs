use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::KvStore;

/// Reserved namespace for session state, separate from every cache.
pub const SESSION_NAMESPACE: &str = "session";

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const USER_KEY: &str = "user";

/// Buffer time before expiry to trigger refresh (5 minutes)
pub const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    pub value: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

/// `now + ttl`, pinned to the calendar bounds instead of overflowing.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(if ttl > Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Access/refresh tokens and the signed-in user, persisted in the
/// [`SESSION_NAMESPACE`] of the shared store and cleared together on logout.
#[derive(Clone)]
pub struct TokenStore {
    store: KvStore,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(store: &KvStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: store.namespaced(SESSION_NAMESPACE),
            clock,
        }
    }

    /// Store a fresh token pair. `refresh` is optional for APIs that only
    /// issue access tokens.
    pub fn set_tokens(
        &self,
        access: &str,
        access_ttl: Duration,
        refresh: Option<(&str, Duration)>,
    ) {
        let now = self.clock.now();
        self.store.set(
            ACCESS_TOKEN_KEY,
            &TokenState {
                value: access.to_string(),
                expires_at: expiry_after(now, access_ttl),
            },
        );
        if let Some((value, ttl)) = refresh {
            self.store.set(
                REFRESH_TOKEN_KEY,
                &TokenState {
                    value: value.to_string(),
                    expires_at: expiry_after(now, ttl),
                },
            );
        }
        debug!(expires_in_secs = access_ttl.num_seconds(), "Stored session tokens");
    }

    /// Token state for `key`, purged if it has expired.
    fn live_token(&self, key: &str) -> Option<TokenState> {
        let token: TokenState = self.store.get(key)?;
        if token.is_expired(self.clock.now()) {
            debug!(token = key, "Token expired, purging");
            self.store.remove(key);
            return None;
        }
        Some(token)
    }

    /// Get the bearer token if it is still valid
    pub fn access_token(&self) -> Option<String> {
        self.live_token(ACCESS_TOKEN_KEY).map(|t| t.value)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.live_token(REFRESH_TOKEN_KEY).map(|t| t.value)
    }

    pub fn access_state(&self) -> Option<TokenState> {
        self.live_token(ACCESS_TOKEN_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Check if the access token will expire within `buffer` and should be
    /// refreshed. A missing or expired token always needs refreshing.
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        match self.access_state() {
            Some(token) => match self.clock.now().checked_add_signed(buffer) {
                Some(horizon) => horizon > token.expires_at,
                None => buffer > Duration::zero(),
            },
            None => true,
        }
    }

    /// [`needs_refresh`](Self::needs_refresh) with the standard buffer.
    pub fn needs_refresh_soon(&self) -> bool {
        self.needs_refresh(Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.access_state().map(|t| t.time_until_expiry(self.clock.now()))
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry()
            .map(|d| d.num_minutes().max(0))
            .unwrap_or(0)
    }

    pub fn set_user(&self, user: &Value) {
        self.store.set(USER_KEY, user);
    }

    pub fn user(&self) -> Option<Value> {
        self.store.get(USER_KEY)
    }

    /// Logout: drop every session key at once.
    pub fn clear(&self) {
        self.store.clear();
        info!("Session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryMedium, StorageMedium};
    use serde_json::json;

    fn tokens() -> (Arc<MemoryMedium>, ManualClock, KvStore, TokenStore) {
        let medium = Arc::new(MemoryMedium::new());
        let clock = ManualClock::at_epoch();
        let kv = KvStore::new(medium.clone());
        let tokens = TokenStore::new(&kv, Arc::new(clock.clone()));
        (medium, clock, kv, tokens)
    }

    #[test]
    fn test_tokens_round_trip_until_expiry() {
        let (_, clock, _, tokens) = tokens();
        tokens.set_tokens("acc", Duration::minutes(30), Some(("ref", Duration::days(7))));

        assert_eq!(tokens.access_token().as_deref(), Some("acc"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("ref"));
        assert!(tokens.is_authenticated());

        clock.advance(Duration::minutes(31));
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token().as_deref(), Some("ref"));
        assert!(!tokens.is_authenticated());
    }

    #[test]
    fn test_expired_token_is_purged() {
        let (medium, clock, _, tokens) = tokens();
        tokens.set_tokens("acc", Duration::seconds(1), None);
        clock.advance(Duration::seconds(2));
        assert_eq!(tokens.access_token(), None);
        assert_eq!(medium.get_item("reefcache:session:access_token").unwrap(), None);
    }

    #[test]
    fn test_persisted_token_shape() {
        let (medium, _, _, tokens) = tokens();
        tokens.set_tokens("acc", Duration::milliseconds(5000), None);
        let raw = medium.get_item("reefcache:session:access_token").unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"value": "acc", "expiresAt": 5000}));
    }

    #[test]
    fn test_needs_refresh_within_buffer() {
        let (_, clock, _, tokens) = tokens();
        assert!(tokens.needs_refresh_soon());

        tokens.set_tokens("acc", Duration::minutes(30), None);
        assert!(!tokens.needs_refresh_soon());
        assert_eq!(tokens.minutes_until_expiry(), 30);

        clock.advance(Duration::minutes(26));
        assert!(tokens.needs_refresh_soon());
        assert_eq!(tokens.minutes_until_expiry(), 4);
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_overflowing() {
        let (_, clock, _, tokens) = tokens();
        tokens.set_tokens("acc", Duration::MAX, Some(("ref", Duration::MAX)));

        // Persisted at millisecond precision
        assert_eq!(
            tokens.access_state().map(|t| t.expires_at.timestamp_millis()),
            Some(DateTime::<Utc>::MAX_UTC.timestamp_millis())
        );
        assert!(!tokens.needs_refresh_soon());
        assert!(tokens.needs_refresh(Duration::MAX));

        clock.advance(Duration::days(365 * 1000));
        assert_eq!(tokens.refresh_token().as_deref(), Some("ref"));
    }

    #[test]
    fn test_logout_clears_only_session_namespace() {
        let (_, _, kv, tokens) = tokens();
        kv.namespaced("cache").set("fish-list", &json!([1]));
        tokens.set_tokens("acc", Duration::minutes(30), Some(("ref", Duration::days(1))));
        tokens.set_user(&json!({"name": "diver"}));

        tokens.clear();

        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_eq!(tokens.user(), None);
        assert_eq!(kv.namespaced("cache").get::<Value>("fish-list"), Some(json!([1])));
    }
}
