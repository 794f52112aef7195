//! Reactive Runtime
//!
//! The runtime owns the notification queue shared by every cell created
//! from it. It is the only place where delivery order is decided.
//!
//! # How It Works
//!
//! 1. When a cell changes, it pushes one delivery per subscriber onto the
//!    queue.
//!
//! 2. If no pass is running, the cell starts one: deliveries are popped and
//!    run in FIFO order until the queue is empty.
//!
//! 3. If a pass is already running (a subscriber wrote to a cell from inside
//!    its callback), the new deliveries are only appended. They run after
//!    everything queued before them, exactly once each, and never inside a
//!    nested pass.
//!
//! # Threading
//!
//! The runtime is single-threaded: cells and aggregates are `Rc`-based and
//! `!Send`. Create one runtime per UI thread (or per form) and thread it into
//! every cell that should batch with the others.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use super::cell::{Cell, Deactivate};
use super::distinct::Distinct;

/// A queued delivery.
pub(crate) type Delivery = Box<dyn FnOnce()>;

#[derive(Default)]
struct Queue {
    pending: VecDeque<Delivery>,
    draining: bool,
    /// Passes cut short by a panicking subscriber.
    resets: u64,
}

/// The batching root shared by a family of cells.
///
/// Cloning a runtime yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct Runtime {
    queue: Rc<RefCell<Queue>>,
}

impl Runtime {
    /// Create a runtime with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cell bound to this runtime.
    pub fn cell<T>(&self, value: T) -> Cell<T>
    where
        T: Clone + Distinct + 'static,
    {
        Cell::new(self, value)
    }

    /// Create a cell whose `activate` callback runs on its first subscriber.
    ///
    /// The callback may return a deactivation callback, run when the last
    /// subscriber leaves.
    pub fn cell_with<T, F>(&self, value: T, activate: F) -> Cell<T>
    where
        T: Clone + Distinct + 'static,
        F: Fn(&Cell<T>) -> Option<Deactivate> + 'static,
    {
        Cell::with_activation(self, value, activate)
    }

    /// Whether a notification pass is currently running.
    pub fn is_draining(&self) -> bool {
        self.queue.borrow().draining
    }

    /// Number of deliveries waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.borrow().pending.len()
    }

    /// How many passes were abandoned because a subscriber panicked.
    ///
    /// Deliveries still queued at that point were dropped, so anything
    /// waiting for them has to start over.
    pub(crate) fn resets(&self) -> u64 {
        self.queue.borrow().resets
    }

    /// Whether two handles share the same queue.
    pub fn same(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }

    /// Queue deliveries and run them unless a pass is already active.
    pub(crate) fn dispatch<I>(&self, deliveries: I)
    where
        I: IntoIterator<Item = Delivery>,
    {
        let start = {
            let mut queue = self.queue.borrow_mut();
            queue.pending.extend(deliveries);
            !queue.draining
        };

        if start {
            self.drain();
        } else {
            trace!(queued = self.queued(), "deferred deliveries to the active pass");
        }
    }

    fn drain(&self) {
        self.queue.borrow_mut().draining = true;
        let guard = DrainGuard { queue: &self.queue };

        let mut delivered = 0usize;
        loop {
            // Release the borrow before running the delivery: it may enqueue.
            let next = self.queue.borrow_mut().pending.pop_front();
            match next {
                Some(delivery) => {
                    delivery();
                    delivered += 1;
                }
                None => break,
            }
        }

        drop(guard);
        trace!(delivered, "notification pass finished");
    }
}

/// Resets the queue when a pass ends, including when a subscriber panics.
struct DrainGuard<'a> {
    queue: &'a RefCell<Queue>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.queue.borrow_mut();
        if std::thread::panicking() {
            warn!(
                dropped = queue.pending.len(),
                "subscriber panicked; discarding the rest of the pass"
            );
            queue.resets += 1;
        }
        queue.pending.clear();
        queue.draining = false;
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("draining", &self.is_draining())
            .field("queued", &self.queued())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn dispatch_runs_immediately_when_idle() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        runtime.dispatch([Box::new(move || l.borrow_mut().push(1)) as Delivery]);

        assert_eq!(*log.borrow(), vec![1]);
        assert!(!runtime.is_draining());
        assert_eq!(runtime.queued(), 0);
        assert_eq!(runtime.resets(), 0);
    }

    #[test]
    fn nested_dispatch_is_deferred_until_current_pass_ends() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (rt, l1, l2, l3) = (runtime.clone(), log.clone(), log.clone(), log.clone());
        let first: Delivery = Box::new(move || {
            l1.borrow_mut().push("first:start");
            let l = l1.clone();
            rt.dispatch([Box::new(move || l.borrow_mut().push("nested")) as Delivery]);
            assert!(rt.is_draining());
            l1.borrow_mut().push("first:end");
        });
        let second: Delivery = Box::new(move || l2.borrow_mut().push("second"));

        runtime.dispatch([first, second]);
        l3.borrow_mut().push("done");

        assert_eq!(
            *log.borrow(),
            vec!["first:start", "first:end", "second", "nested", "done"]
        );
    }

    #[test]
    fn panicking_delivery_leaves_queue_usable() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            runtime.dispatch([
                Box::new(|| panic!("bad subscriber")) as Delivery,
                Box::new(move || l.borrow_mut().push("skipped")) as Delivery,
            ]);
        }));
        assert!(result.is_err());
        assert!(!runtime.is_draining());
        assert_eq!(runtime.queued(), 0);
        assert_eq!(runtime.resets(), 1);

        let l = log.clone();
        runtime.dispatch([Box::new(move || l.borrow_mut().push("after")) as Delivery]);
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn clones_share_the_queue() {
        let a = Runtime::new();
        let b = a.clone();
        assert!(a.same(&b));
        assert!(!a.same(&Runtime::new()));
    }
}
