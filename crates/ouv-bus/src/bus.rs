//! Event bus keyed by event name
//!
//! Listeners run synchronously inside [`EventBus::emit`] in registration
//! order. A listener that returns an error or panics is logged and skipped;
//! the remaining listeners still see the event.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Listener callback stored by the bus
pub type Listener<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

struct Registered<E> {
    id: u64,
    listener: Listener<E>,
}

struct BusInner<E> {
    /// Event name -> listeners, both in registration order
    listeners: Mutex<IndexMap<String, Vec<Registered<E>>>>,
    next_id: AtomicU64,
}

/// Detaches a single listener; implemented by every bus regardless of payload type
trait Detach: Send + Sync {
    fn detach(&self, event: &str, id: u64) -> bool;
}

impl<E> Detach for BusInner<E> {
    fn detach(&self, event: &str, id: u64) -> bool {
        let mut guard = self.listeners.lock();
        let Some(list) = guard.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            guard.shift_remove(event);
        }
        removed
    }
}

/// Publish/subscribe registry
///
/// Cloning yields another handle to the same registry.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E: 'static> EventBus<E> {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(IndexMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for `event`
    ///
    /// Returns a [`Subscription`] whose [`Subscription::unsubscribe`] removes
    /// exactly this listener. Dropping the subscription leaves the listener
    /// registered.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Registered {
                id,
                listener: Arc::new(callback),
            });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        let bus: Weak<dyn Detach> = weak;
        Subscription {
            event: event.to_string(),
            id,
            bus,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `data` to every listener of `event`
    ///
    /// Returns how many listeners completed successfully. Never fails: errors
    /// and panics from listeners are logged and contained.
    pub fn emit(&self, event: &str, data: &E) -> usize {
        // Snapshot so listeners may (un)subscribe while being called
        let snapshot: Vec<Listener<E>> = {
            let guard = self.inner.listeners.lock();
            match guard.get(event) {
                Some(list) => list.iter().map(|r| Arc::clone(&r.listener)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(data))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => {
                    tracing::error!(event, listener = index, %error, "event listener failed");
                }
                Err(panic) => {
                    tracing::error!(
                        event,
                        listener = index,
                        panic = panic_message(panic.as_ref()),
                        "event listener panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Remove every listener for `event`, returning how many were removed
    pub fn off(&self, event: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .shift_remove(event)
            .map_or(0, |list| list.len())
    }

    /// Remove all listeners for all events
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Number of listeners registered for `event`
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Events that currently have at least one listener, in first-registration order
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.inner.listeners.lock().keys().cloned().collect()
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.listeners.lock();
        f.debug_map()
            .entries(guard.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

/// Handle for one registered listener
pub struct Subscription {
    event: String,
    id: u64,
    bus: Weak<dyn Detach>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener; calling this more than once is a no-op
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.detach(&self.event, self.id))
    }

    /// Whether the listener is still registered
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.bus.strong_count() > 0
    }

    /// Event name this subscription listens to
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
