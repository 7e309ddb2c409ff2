use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error};

type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Subscriber<P> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<P>,
}

struct BusInner<P> {
    domains: Mutex<HashMap<String, Vec<Subscriber<P>>>>,
    next_id: AtomicU64,
}

impl<P> BusInner<P> {
    fn domains(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber<P>>>> {
        self.domains.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, domain: &str, id: u64) {
        let mut domains = self.domains();
        if let Some(subscribers) = domains.get_mut(domain) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                domains.remove(domain);
            }
        }
    }
}

/// In-process publish/subscribe, one subscriber list per domain.
///
/// Delivery is synchronous and in registration order. A subscriber that
/// panics is logged and skipped; the remaining subscribers still run and
/// the publisher never sees the panic. Clones share the same subscriber
/// lists.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                domains: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe<F>(&self, domain: &str, callback: F) -> Subscription<P>
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.inner
            .domains()
            .entry(domain.to_string())
            .or_default()
            .push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
        debug!(domain = domain, subscriber = id, "Subscribed");

        Subscription {
            domain: domain.to_string(),
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `payload` to every current subscriber of `domain`.
    /// Returns how many subscribers completed without panicking.
    pub fn publish(&self, domain: &str, payload: &P) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlock
        let snapshot: Vec<(u64, Arc<AtomicBool>, Callback<P>)> =
            match self.inner.domains().get(domain) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.active), Arc::clone(&s.callback)))
                    .collect(),
                None => return 0,
            };

        let mut delivered = 0;
        for (id, active, callback) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        domain = domain,
                        subscriber = id,
                        reason = %reason,
                        "Subscriber panicked during publish"
                    );
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, domain: &str) -> usize {
        self.inner.domains().get(domain).map(Vec::len).unwrap_or(0)
    }

    /// Drop every subscriber on every domain.
    pub fn clear(&self) {
        let mut domains = self.inner.domains();
        for subscriber in domains.values().flatten() {
            subscriber.active.store(false, Ordering::Release);
        }
        domains.clear();
    }
}

/// Handle returned by [`EventBus::subscribe`]. The subscription lasts until
/// [`unsubscribe`](Self::unsubscribe) is called; dropping the handle does
/// not end it.
pub struct Subscription<P> {
    domain: String,
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner<P>>,
}

impl<P> Subscription<P> {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::Release);
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.domain, self.id);
            debug!(domain = %self.domain, subscriber = self.id, "Unsubscribed");
        }
    }
}
