//! Synchronous event hub for the cask blob store.
//!
//! Two event kinds flow through the hub: [`EventKind::NewBlob`], emitted
//! once per accepted blob, and [`EventKind::ScanBlob`], emitted for every
//! blob during a full scan. Delivery is synchronous on the publishing
//! thread, in registration order, and fail-fast: the first subscriber
//! error aborts publication and surfaces to the original caller, so a
//! subscriber failure fails the write. There is no asynchronous delivery.

use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use cask_types::{Blob, Context};

/// Errors from event publication.
#[derive(Debug, Error)]
pub enum HubError {
    /// A subscriber rejected the event; publication was aborted.
    #[error("subscriber {name} failed: {reason}")]
    Subscriber { name: String, reason: String },
}

/// Result alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Classification of blob events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A blob was just accepted by the store.
    NewBlob,
    /// A blob was visited by a full store scan.
    ScanBlob,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewBlob => write!(f, "NewBlob"),
            Self::ScanBlob => write!(f, "ScanBlob"),
        }
    }
}

/// A subscriber callback. Returning an error aborts the publication.
pub type Callback = Box<dyn Fn(&Context, &Blob) -> Result<(), String> + Send + Sync>;

/// Handle returned by [`Hub::subscribe`], used to unsubscribe at shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    name: String,
    kind: EventKind,
    callback: Callback,
}

/// Synchronous publish/subscribe hub.
///
/// Subscription is expected at startup and unsubscription only at
/// shutdown; the subscriber list is guarded by a single mutex held for the
/// duration of a publication, which also serializes deliveries of the same
/// event kind.
pub struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Register a named callback for an event kind. Names exist for error
    /// attribution and logs. The returned id unsubscribes at shutdown.
    pub fn subscribe(
        &self,
        kind: EventKind,
        name: impl Into<String>,
        callback: Callback,
    ) -> SubscriberId {
        let name = name.into();
        let id = SubscriberId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        );
        debug!(%kind, name = %name, "subscriber registered");
        self.subscribers
            .lock()
            .expect("hub lock poisoned")
            .push(Subscriber {
                id,
                name,
                kind,
                callback,
            });
        id
    }

    /// Remove a subscriber. Intended only during shutdown; events already
    /// being published still reach it.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers
            .lock()
            .expect("hub lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Deliver an event to every matching subscriber, in registration
    /// order, on the calling thread. Short-circuits on the first error.
    pub fn publish(&self, ctx: &Context, kind: EventKind, blob: &Blob) -> HubResult<()> {
        let subs = self.subscribers.lock().expect("hub lock poisoned");
        for sub in subs.iter().filter(|s| s.kind == kind) {
            if let Err(reason) = (sub.callback)(ctx, blob) {
                return Err(HubError::Subscriber {
                    name: sub.name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Number of registered subscribers for an event kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .expect("hub lock poisoned")
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = self.subscribers.lock().expect("hub lock poisoned");
        f.debug_struct("Hub").field("subscribers", &subs.len()).finish()
    }
}
