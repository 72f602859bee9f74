//! Synchronous publish/subscribe notification surface.
//!
//! Mirrors the signal/slot pattern the rest of the pipeline relies on:
//! listeners are invoked synchronously after a state mutation completes,
//! decoupled from any event loop. Delivery is fire-and-forget with
//! at-least-once semantics, so a duplicate notification must be harmless
//! to the receiver (re-query, re-display).

use parking_lot::Mutex;
use std::sync::Arc;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct HubInner<E> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<E>)>,
}

/// A list of registered listener callbacks for events of type `E`.
///
/// Cloning shares the listener list; emitting from any clone notifies all
/// subscribers.
pub struct SignalHub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E> Clone for SignalHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for SignalHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SignalHub<E> {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener; returns an id usable with [`unsubscribe`].
    ///
    /// [`unsubscribe`]: SignalHub::unsubscribe
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener. Removing an unknown id is a
    /// no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    /// Invoke every listener with `event`.
    ///
    /// The listener list is snapshotted and the lock released before any
    /// listener runs, so a listener may subscribe, unsubscribe or emit
    /// re-entrantly. A listener unsubscribed concurrently with an emit may
    /// still observe that event once.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = {
            let inner = self.inner.lock();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Events published by a frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    /// Entries were appended or the index was cleared.
    Changed,
}

/// Events published by a render backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// Rendering parameters were replaced.
    ParamsChanged,
    /// A time range lost its cached validity and should be re-queried.
    CacheInvalidated(crate::time::TimeRange),
}
