//! Subscriber types for the reactive system.
//!
//! A subscriber is a pair of callbacks registered on a cell: `on_value`
//! receives every delivered value, `on_invalidate` is told synchronously that
//! a value is about to be delivered. Registration hands back a
//! [`Subscription`] whose only job is to undo the registration.

use std::cell::{Cell as Flag, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::Context;

/// Unique identifier for a subscriber.
///
/// Each registration gets a fresh ID, so subscribing the same closure twice
/// produces two independent subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Value callback. The context is `Some` only when the writer supplied one.
pub type OnValue<T> = Box<dyn Fn(&T, Option<&Context>)>;

/// Invalidation callback, run synchronously before a value is queued.
pub type OnInvalidate = Box<dyn Fn()>;

/// A registered subscriber on a single cell.
pub(crate) struct Subscriber<T> {
    id: SubscriberId,
    on_value: OnValue<T>,
    on_invalidate: OnInvalidate,
    /// Cleared on unsubscribe so that deliveries still sitting in the queue
    /// are dropped instead of reaching a departed subscriber.
    active: Flag<bool>,
}

impl<T> Subscriber<T> {
    pub(crate) fn new(on_value: OnValue<T>, on_invalidate: OnInvalidate) -> Self {
        Self {
            id: SubscriberId::new(),
            on_value,
            on_invalidate,
            active: Flag::new(true),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }

    pub(crate) fn invalidate(&self) {
        if self.is_active() {
            (self.on_invalidate)();
        }
    }

    /// Deliver a value. No-op once the subscriber has left.
    pub(crate) fn deliver(&self, value: &T, context: Option<&Context>) {
        if self.is_active() {
            (self.on_value)(value, context);
        }
    }
}

/// Handle returned by every `subscribe` call.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] may be
/// called any number of times, including after the cell itself is gone.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, release: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            id,
            release: RefCell::new(Some(Box::new(release))),
        }
    }

    /// The ID of the subscriber this handle controls.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether `unsubscribe` has already run.
    pub fn is_closed(&self) -> bool {
        self.release.borrow().is_none()
    }

    /// Remove the subscriber. Idempotent.
    pub fn unsubscribe(&self) {
        // Take before calling: the release may drop the last subscriber and
        // run a deactivation callback that touches other subscriptions.
        let release = self.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Keep the subscriber registered for as long as the cell lives.
    pub fn detach(self) {
        self.release.borrow_mut().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
