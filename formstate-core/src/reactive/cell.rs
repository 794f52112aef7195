//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds one value and a
//! list of subscribers.
//!
//! # How Cells Work
//!
//! 1. The first subscriber activates the cell, running its optional
//!    activation callback. The last subscriber leaving deactivates it,
//!    running whatever the activation callback returned.
//!
//! 2. A write that is not [`Distinct`] from the current value is ignored.
//!
//! 3. A distinct write to an active cell invalidates every subscriber
//!    synchronously, then hands one delivery per subscriber to the runtime
//!    queue. Writes to an inactive cell only store the value.
//!
//! # Handles
//!
//! `Cell<T>` is a cheap handle: clones share the value and subscriber list.
//! Aggregates hold such handles without ever creating or dropping cells on
//! their own.

use std::cell::{Cell as Flag, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::context::Context;
use super::distinct::Distinct;
use super::runtime::{Delivery, Runtime};
use super::subscriber::{SubscriberId, Subscriber, Subscription};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Callback run when the last subscriber leaves an activated cell.
pub type Deactivate = Box<dyn FnOnce()>;

type Activate<T> = Rc<dyn Fn(&Cell<T>) -> Option<Deactivate>>;

struct CellInner<T> {
    id: u64,
    runtime: Runtime,
    value: RefCell<T>,
    subscribers: RefCell<IndexMap<SubscriberId, Rc<Subscriber<T>>>>,
    activate: Option<Activate<T>>,
    deactivate: RefCell<Option<Deactivate>>,
    /// Set once activation has completed, cleared on deactivation.
    active: Flag<bool>,
}

/// A reactive value holder.
///
/// # Example
///
/// ```rust
/// use formstate_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.cell(0);
///
/// let subscription = count.subscribe(|value, _| println!("count = {value}"));
/// count.set(5);
/// subscription.unsubscribe();
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Distinct + 'static,
{
    /// Create a cell bound to `runtime`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self::build(runtime, value, None)
    }

    /// Create a cell with an activation callback.
    pub fn with_activation<F>(runtime: &Runtime, value: T, activate: F) -> Self
    where
        F: Fn(&Cell<T>) -> Option<Deactivate> + 'static,
    {
        Self::build(runtime, value, Some(Rc::new(activate)))
    }

    fn build(runtime: &Runtime, value: T, activate: Option<Activate<T>>) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: next_cell_id(),
                runtime: runtime.clone(),
                value: RefCell::new(value),
                subscribers: RefCell::new(IndexMap::new()),
                activate,
                deactivate: RefCell::new(None),
                active: Flag::new(false),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The runtime this cell delivers through.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Read the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn has_subscribers(&self) -> bool {
        !self.inner.subscribers.borrow().is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Subscribe and immediately receive the current value.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T, Option<&Context>) + 'static,
    {
        self.subscribe_with(on_value, || {}, true)
    }

    /// Subscribe with an invalidation callback, optionally skipping the
    /// initial call.
    ///
    /// The initial call (when `run_first` is set) never carries a context.
    pub fn subscribe_with<F, I>(&self, on_value: F, on_invalidate: I, run_first: bool) -> Subscription
    where
        F: Fn(&T, Option<&Context>) + 'static,
        I: Fn() + 'static,
    {
        let subscriber = Rc::new(Subscriber::new(Box::new(on_value), Box::new(on_invalidate)));
        let id = subscriber.id();

        let first = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers.insert(id, Rc::clone(&subscriber));
            subscribers.len() == 1
        };

        if first {
            self.start();
        }

        if run_first {
            let value = self.get();
            subscriber.deliver(&value, None);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                Cell { inner }.remove(id);
            }
        })
    }

    /// Set a new value without a context.
    pub fn set(&self, value: T) {
        self.write(value, None);
    }

    /// Set a new value tagged with `context`.
    pub fn set_with(&self, value: T, context: impl Into<Context>) {
        self.write(value, Some(context.into()));
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get());
        self.set(next);
    }

    /// Update the value and tag the change with `context`.
    pub fn update_with<F>(&self, f: F, context: impl Into<Context>)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get());
        self.set_with(next, context);
    }

    fn write(&self, value: T, context: Option<Context>) {
        if !self.inner.value.borrow().is_distinct(&value) {
            trace!(cell = self.inner.id, "write ignored: value unchanged");
            return;
        }

        let delivered = Rc::new(value.clone());
        *self.inner.value.borrow_mut() = value;

        if !self.inner.active.get() {
            return;
        }

        let subscribers: Vec<Rc<Subscriber<T>>> =
            self.inner.subscribers.borrow().values().cloned().collect();
        if subscribers.is_empty() {
            return;
        }

        for subscriber in &subscribers {
            subscriber.invalidate();
        }

        trace!(
            cell = self.inner.id,
            subscribers = subscribers.len(),
            context = ?context,
            "queueing deliveries"
        );

        let context = context.map(Rc::new);
        let deliveries = subscribers.into_iter().map(|subscriber| {
            let value = Rc::clone(&delivered);
            let context = context.clone();
            Box::new(move || subscriber.deliver(&value, context.as_deref())) as Delivery
        });
        self.inner.runtime.dispatch(deliveries);
    }

    fn start(&self) {
        debug!(cell = self.inner.id, "activating cell");
        let deactivate = match &self.inner.activate {
            Some(activate) => activate(self),
            None => None,
        };
        *self.inner.deactivate.borrow_mut() = deactivate;
        self.inner.active.set(true);
    }

    fn stop(&self) {
        debug!(cell = self.inner.id, "deactivating cell");
        self.inner.active.set(false);
        let deactivate = self.inner.deactivate.borrow_mut().take();
        if let Some(deactivate) = deactivate {
            deactivate();
        }
    }

    fn remove(&self, id: SubscriberId) {
        let (removed, last) = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            let removed = subscribers.shift_remove(&id);
            (removed, subscribers.is_empty())
        };

        if let Some(subscriber) = removed {
            subscriber.deactivate();
            if last {
                self.stop();
            }
        }
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .field("active", &self.inner.active.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T, Option<&Context>)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |value: &T, _: Option<&Context>| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn cell_get_and_set() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let runtime = Runtime::new();
        let cell = runtime.cell(10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn subscribe_runs_first_by_default() {
        let runtime = Runtime::new();
        let cell = runtime.cell(1);
        let (log, on_value) = recorder::<i32>();

        let _sub = cell.subscribe(on_value);
        cell.set(2);

        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn subscribe_without_run_first() {
        let runtime = Runtime::new();
        let cell = runtime.cell(1);
        let (log, on_value) = recorder::<i32>();

        let _sub = cell.subscribe_with(on_value, || {}, false);
        assert!(log.borrow().is_empty());

        cell.set(2);
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn equal_write_does_not_notify() {
        let runtime = Runtime::new();
        let cell = runtime.cell(3);
        let (log, on_value) = recorder::<i32>();

        let _sub = cell.subscribe_with(on_value, || {}, false);
        cell.set(3);
        cell.set(3);

        assert!(log.borrow().is_empty());
    }

    #[test]
    fn vec_write_always_notifies() {
        let runtime = Runtime::new();
        let cell = runtime.cell(vec![1]);
        let (log, on_value) = recorder::<Vec<i32>>();

        let _sub = cell.subscribe_with(on_value, || {}, false);
        cell.set(vec![1]);
        cell.update(|v| v.clone());

        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn activation_runs_once_per_subscriber_epoch() {
        let runtime = Runtime::new();
        let starts = Rc::new(Flag::new(0));
        let stops = Rc::new(Flag::new(0));

        let (s, t) = (starts.clone(), stops.clone());
        let cell = runtime.cell_with(0, move |_| {
            s.set(s.get() + 1);
            let t = t.clone();
            Some(Box::new(move || t.set(t.get() + 1)) as Deactivate)
        });

        let first = cell.subscribe(|_, _| {});
        let second = cell.subscribe(|_, _| {});
        assert_eq!((starts.get(), stops.get()), (1, 0));

        first.unsubscribe();
        assert_eq!(stops.get(), 0);
        second.unsubscribe();
        assert_eq!((starts.get(), stops.get()), (1, 1));

        let _third = cell.subscribe(|_, _| {});
        assert_eq!((starts.get(), stops.get()), (2, 1));
    }

    #[test]
    fn activation_can_seed_the_value() {
        let runtime = Runtime::new();
        let cell = runtime.cell_with(0, |cell: &Cell<i32>| {
            cell.set(99);
            None
        });
        let (log, on_value) = recorder::<i32>();

        let _sub = cell.subscribe(on_value);
        assert_eq!(*log.borrow(), vec![99]);
    }

    #[test]
    fn unsubscribe_twice_is_a_noop() {
        let runtime = Runtime::new();
        let stops = Rc::new(Flag::new(0));
        let t = stops.clone();
        let cell = runtime.cell_with(0, move |_| {
            let t = t.clone();
            Some(Box::new(move || t.set(t.get() + 1)) as Deactivate)
        });

        let sub = cell.subscribe(|_, _| {});
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(stops.get(), 1);
        assert!(!cell.has_subscribers());
    }

    #[test]
    fn unsubscribe_after_cell_dropped() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        let sub = cell.subscribe(|_, _| {});
        drop(cell);
        sub.unsubscribe();
        assert!(sub.is_closed());
    }

    #[test]
    fn set_on_inactive_cell_stores_without_notifying() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        let sub = cell.subscribe_with(|_, _| panic!("must not be called"), || {}, false);
        sub.unsubscribe();

        cell.set(5);
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn invalidate_precedes_value_delivery() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (lv, li) = (log.clone(), log.clone());
        let _sub = cell.subscribe_with(
            move |v: &i32, _| lv.borrow_mut().push(format!("value {v}")),
            move || li.borrow_mut().push("invalidate".to_string()),
            false,
        );
        cell.set(1);

        assert_eq!(*log.borrow(), vec!["invalidate", "value 1"]);
    }

    #[test]
    fn context_is_forwarded_only_when_supplied() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        let _sub = cell.subscribe(move |_, context| s.borrow_mut().push(context.cloned()));
        cell.set(1);
        cell.set_with(2, "email");
        cell.update_with(|v| v + 1, true);

        assert_eq!(
            *seen.borrow(),
            vec![None, None, Some(Context::tag("email")), Some(Context::Force)]
        );
    }

    #[test]
    fn reentrant_writes_are_delivered_after_the_current_pass() {
        let runtime = Runtime::new();
        let a = runtime.cell(0);
        let b = runtime.cell(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (b_writer, la) = (b.clone(), log.clone());
        let _sa = a.subscribe_with(
            move |v: &i32, _| {
                la.borrow_mut().push(format!("a1={v}"));
                b_writer.set(v * 10);
                la.borrow_mut().push("a1 done".to_string());
            },
            || {},
            false,
        );
        let la2 = log.clone();
        let _sa2 = a.subscribe_with(move |v: &i32, _| la2.borrow_mut().push(format!("a2={v}")), || {}, false);
        let lb = log.clone();
        let _sb = b.subscribe_with(move |v: &i32, _| lb.borrow_mut().push(format!("b={v}")), || {}, false);

        a.set(1);

        assert_eq!(*log.borrow(), vec!["a1=1", "a1 done", "a2=1", "b=10"]);
    }

    #[test]
    fn unsubscribed_subscriber_skips_queued_delivery() {
        let runtime = Runtime::new();
        let cell = runtime.cell(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let second: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let handle = second.clone();
        let _first = cell.subscribe_with(
            move |_, _| {
                if let Some(sub) = handle.borrow().as_ref() {
                    sub.unsubscribe();
                }
            },
            || {},
            false,
        );
        let l = log.clone();
        *second.borrow_mut() = Some(cell.subscribe_with(move |v: &i32, _| l.borrow_mut().push(*v), || {}, false));

        cell.set(1);
        assert!(log.borrow().is_empty());
        assert_eq!(cell.subscriber_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let runtime = Runtime::new();
        let cell1 = runtime.cell(0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);
        assert_eq!(cell1.id(), cell2.id());
    }
}
