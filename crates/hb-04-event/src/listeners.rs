//! Local event listeners.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::{EventPayload, Origin, SubsystemId};
use tracing::{debug, error};

/// Handle returned on registration, used to remove one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which origins a listener wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenerScope {
    #[default]
    Any,
    /// Only events emitted by backend code.
    LocalOnly,
    /// Only events received from the remote UI.
    RemoteOnly,
}

impl ListenerScope {
    #[must_use]
    pub fn accepts(&self, origin: Origin) -> bool {
        match self {
            Self::Any => true,
            Self::LocalOnly => origin == Origin::Local,
            Self::RemoteOnly => origin == Origin::Remote,
        }
    }
}

/// What a listener callback receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub name: String,
    pub data: Value,
    pub origin: Origin,
}

impl From<EventPayload> for EventNotification {
    fn from(event: EventPayload) -> Self {
        Self {
            name: event.name,
            data: event.data,
            origin: event.origin,
        }
    }
}

/// Listener callback.
pub type EventCallback = Arc<dyn Fn(&EventNotification) + Send + Sync>;

/// Registration options.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    pub owner: SubsystemId,
    pub scope: ListenerScope,
    /// Number of deliveries before the listener removes itself. `None` means
    /// unlimited.
    pub limit: Option<u64>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            owner: SubsystemId::Application,
            scope: ListenerScope::Any,
            limit: None,
        }
    }
}

struct Listener {
    id: ListenerId,
    owner: SubsystemId,
    scope: ListenerScope,
    remaining: Option<AtomicU64>,
    callback: EventCallback,
}

impl Listener {
    /// Claim one delivery. Returns `(deliver, exhausted)`.
    fn claim(&self) -> (bool, bool) {
        let Some(remaining) = &self.remaining else {
            return (true, false);
        };
        match remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
            Ok(previous) => (true, previous == 1),
            Err(_) => (false, true),
        }
    }
}

/// Listener set keyed by event name.
///
/// Registration and removal take the write lock; claiming clones the list
/// for one name under the read lock so callbacks run without holding it.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<Arc<Listener>>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, options: ListenerOptions, callback: EventCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Arc::new(Listener {
            id,
            owner: options.owner,
            scope: options.scope,
            remaining: options.limit.map(AtomicU64::new),
            callback,
        });
        self.listeners
            .write()
            .entry(name.to_string())
            .or_default()
            .push(listener);
        debug!(event = name, listener = %id, owner = %options.owner, "Listener registered");
        id
    }

    /// Remove one listener.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        listeners.retain(|_, list| {
            let before = list.len();
            list.retain(|l| l.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Remove every listener for `name`.
    pub fn remove_event(&self, name: &str) -> usize {
        self.listeners.write().remove(name).map_or(0, |list| list.len())
    }

    /// Remove every listener registered by `owner`.
    pub fn remove_owner(&self, owner: SubsystemId) -> usize {
        let mut listeners = self.listeners.write();
        let mut removed = 0;
        listeners.retain(|_, list| {
            let before = list.len();
            list.retain(|l| l.owner != owner);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Listeners currently registered for `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take one delivery from every listener of `event` that accepts it,
    /// removing listeners whose limit is now used up. The returned callbacks
    /// have not run yet.
    pub fn claim(&self, event: &EventNotification) -> Vec<ClaimedListener> {
        let snapshot: Vec<Arc<Listener>> = match self.listeners.read().get(&event.name) {
            Some(list) => list.clone(),
            None => return Vec::new(),
        };

        let mut claimed = Vec::with_capacity(snapshot.len());
        for listener in snapshot {
            if !listener.scope.accepts(event.origin) {
                continue;
            }
            let (deliver, exhausted) = listener.claim();
            if exhausted {
                self.remove(listener.id);
            }
            if deliver {
                claimed.push(ClaimedListener {
                    id: listener.id,
                    callback: Arc::clone(&listener.callback),
                });
            }
        }
        claimed
    }

    /// Deliver `event` to a snapshot of its listeners on the calling thread.
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, event: &EventNotification) -> usize {
        let claimed = self.claim(event);
        let delivered = claimed.len();
        for listener in claimed {
            listener.invoke(event);
        }
        delivered
    }
}

/// A listener callback that has been granted one delivery.
#[derive(Clone)]
pub struct ClaimedListener {
    id: ListenerId,
    callback: EventCallback,
}

impl ClaimedListener {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Run the callback. A panic is logged and contained.
    pub fn invoke(&self, event: &EventNotification) {
        let callback = &self.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!(
                event = %event.name,
                listener = %self.id,
                "Event listener panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn notification(name: &str, origin: Origin) -> EventNotification {
        EventNotification {
            name: name.into(),
            data: json!(1),
            origin,
        }
    }

    fn counter() -> (Arc<AtomicU64>, EventCallback) {
        let hits = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&hits);
        let callback: EventCallback = Arc::new(move |_: &EventNotification| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (hits, callback)
    }

    #[test]
    fn test_limit_removes_listener() {
        let registry = ListenerRegistry::new();
        let (hits, callback) = counter();
        let options = ListenerOptions {
            limit: Some(2),
            ..ListenerOptions::default()
        };
        registry.add("tick", options, callback);

        for _ in 0..5 {
            registry.dispatch(&notification("tick", Origin::Local));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.count("tick"), 0);
    }

    #[test]
    fn test_claim_consumes_once_without_running() {
        let registry = ListenerRegistry::new();
        let (hits, callback) = counter();
        let options = ListenerOptions {
            limit: Some(1),
            ..ListenerOptions::default()
        };
        let id = registry.add("tick", options, callback);

        let claimed = registry.claim(&notification("tick", Origin::Local));
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id(), id);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.count("tick"), 0);
        assert!(registry.claim(&notification("tick", Origin::Local)).is_empty());

        claimed[0].invoke(&notification("tick", Origin::Local));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_filters_origin() {
        let registry = ListenerRegistry::new();
        let (remote_hits, remote) = counter();
        let (local_hits, local) = counter();
        registry.add(
            "ping",
            ListenerOptions {
                scope: ListenerScope::RemoteOnly,
                ..ListenerOptions::default()
            },
            remote,
        );
        registry.add(
            "ping",
            ListenerOptions {
                scope: ListenerScope::LocalOnly,
                ..ListenerOptions::default()
            },
            local,
        );

        registry.dispatch(&notification("ping", Origin::Remote));
        assert_eq!(remote_hits.load(Ordering::SeqCst), 1);
        assert_eq!(local_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next_event() {
        let registry = Arc::new(ListenerRegistry::new());
        let (late_hits, late) = counter();
        let late = Mutex::new(Some(late));

        let inner = Arc::clone(&registry);
        registry.add(
            "batch",
            ListenerOptions::default(),
            Arc::new(move |_: &EventNotification| {
                if let Some(callback) = late.lock().take() {
                    inner.add("batch", ListenerOptions::default(), callback);
                }
            }),
        );

        assert_eq!(registry.dispatch(&notification("batch", Origin::Local)), 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        assert_eq!(registry.dispatch(&notification("batch", Origin::Local)), 2);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let registry = ListenerRegistry::new();
        let failing: EventCallback = Arc::new(|_: &EventNotification| panic!("listener failed"));
        registry.add("boom", ListenerOptions::default(), failing);
        let (hits, callback) = counter();
        registry.add("boom", ListenerOptions::default(), callback);

        assert_eq!(registry.dispatch(&notification("boom", Origin::Local)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_by_id_event_and_owner() {
        let registry = ListenerRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();
        let (_, c) = counter();
        let first = registry.add("x", ListenerOptions::default(), a);
        registry.add("x", ListenerOptions::default(), b);
        registry.add(
            "y",
            ListenerOptions {
                owner: SubsystemId::Runtime,
                ..ListenerOptions::default()
            },
            c,
        );

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert_eq!(registry.remove_owner(SubsystemId::Runtime), 1);
        assert_eq!(registry.remove_event("x"), 1);
        assert!(registry.is_empty());
    }
}
