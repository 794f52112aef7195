//! Aggregate Implementation
//!
//! An Aggregate combines a fixed set of named cells into one snapshot and
//! decides, change by change, whether its own subscribers should hear about
//! it.
//!
//! # How Aggregates Work
//!
//! 1. The first subscriber activates the aggregate, which subscribes to
//!    every member cell. The last subscriber leaving drops those member
//!    subscriptions again.
//!
//! 2. A member write first invalidates the aggregate synchronously, which
//!    counts one outstanding delivery. The delivery itself arrives later
//!    through the runtime queue with `(name, context)`.
//!
//! 3. Inside a transaction the change is buffered as pending. Outside one it
//!    joins the current batch. When the last outstanding delivery arrives,
//!    the batch is settled: if any change in it passes the filter (tracked
//!    key, `track_all`, or a matching context) subscribers are called once.
//!    Changes that do not qualify are dropped.
//!
//! 4. `flush` (and the outermost `close`) resolves pending changes for every
//!    aggregate in the linked group. Each member re-evaluates its buffered
//!    changes against its own filter and publishes at most once.
//!
//! # Coalescing
//!
//! A subscriber that writes to another member while a pass is running only
//! adds to the outstanding count, so the aggregate waits for that delivery
//! too and publishes once for the whole batch. Subscribers receive a live
//! [`Fields`] handle, not a copy.

use std::cell::{Cell as Flag, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{Result, StoreError};

use super::cell::{Cell, Deactivate};
use super::context::{Context, ContextMatcher, IntoContexts};
use super::distinct::Distinct;
use super::fields::Fields;
use super::options::{AggregateOptions, TrackOptions};
use super::runtime::Runtime;
use super::subscriber::Subscription;
use super::transaction::{GroupMember, Transaction};
use super::view::View;

/// Composite value of an aggregate, in member order.
pub type Snapshot<T> = IndexMap<String, T>;

type Matchers = SmallVec<[ContextMatcher; 2]>;

/// A buffered member change: the member name and the context it carried.
type PendingChange = (String, Option<Context>);

struct AggregateInner<T> {
    /// Shared with every linked clone.
    cells: Rc<IndexMap<String, Cell<T>>>,
    transaction: Transaction,
    tracked_keys: RefCell<IndexSet<String>>,
    track_all: Flag<bool>,
    tracked_contexts: RefCell<IndexMap<String, Matchers>>,
    /// Changes buffered by an open transaction, resolved on flush.
    pending: RefCell<IndexSet<PendingChange>>,
    /// Changes delivered outside a transaction, settled once `outstanding`
    /// drops to zero.
    batch: RefCell<IndexSet<PendingChange>>,
    /// Member invalidations whose delivery has not arrived yet.
    outstanding: Flag<usize>,
    /// `Runtime::resets` as of the last member invalidation.
    resets: Flag<u64>,
    /// Carries publications to this aggregate's own subscribers.
    output: Cell<Fields<T>>,
    this: Weak<AggregateInner<T>>,
}

/// A composite view over named cells with a notification filter.
///
/// Cloning an `Aggregate` yields another handle to the same aggregate. Use
/// [`Aggregate::linked`] or [`Aggregate::clone_linked`] for a sibling with
/// its own filter.
pub struct Aggregate<T> {
    inner: Rc<AggregateInner<T>>,
}

impl<T> Aggregate<T>
where
    T: Clone + Distinct + 'static,
{
    /// Create an aggregate that tracks nothing until told to.
    pub fn new<I, K>(cells: I) -> Self
    where
        I: IntoIterator<Item = (K, Cell<T>)>,
        K: Into<String>,
    {
        Self::with_options(cells, AggregateOptions::default())
    }

    /// Create an aggregate with explicit tracking options.
    ///
    /// A name given twice keeps the last cell.
    pub fn with_options<I, K>(cells: I, options: AggregateOptions) -> Self
    where
        I: IntoIterator<Item = (K, Cell<T>)>,
        K: Into<String>,
    {
        let cells: IndexMap<String, Cell<T>> =
            cells.into_iter().map(|(name, cell)| (name.into(), cell)).collect();
        Self::build(Rc::new(cells), Transaction::new(), options)
    }

    /// Like [`Aggregate::with_options`], but rejects duplicate names.
    pub fn try_new<I, K>(cells: I, options: AggregateOptions) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Cell<T>)>,
        K: Into<String>,
    {
        let mut members = IndexMap::new();
        for (name, cell) in cells {
            let name = name.into();
            if members.contains_key(&name) {
                return Err(StoreError::DuplicateKey(name));
            }
            members.insert(name, cell);
        }
        Ok(Self::build(Rc::new(members), Transaction::new(), options))
    }

    fn build(
        cells: Rc<IndexMap<String, Cell<T>>>,
        transaction: Transaction,
        options: AggregateOptions,
    ) -> Self {
        let runtime = cells
            .values()
            .next()
            .map(|cell| cell.runtime().clone())
            .unwrap_or_default();
        let initial = Fields::new(Rc::clone(&cells));

        let inner = Rc::new_cyclic(|this: &Weak<AggregateInner<T>>| {
            let weak = this.clone();
            let output = Cell::with_activation(&runtime, initial, move |_| {
                weak.upgrade().map(|inner| inner.connect())
            });

            AggregateInner {
                cells,
                transaction: transaction.clone(),
                tracked_keys: RefCell::new(options.tracked_keys.into_iter().collect()),
                track_all: Flag::new(options.track_all),
                tracked_contexts: RefCell::new(IndexMap::new()),
                pending: RefCell::new(IndexSet::new()),
                batch: RefCell::new(IndexSet::new()),
                outstanding: Flag::new(0),
                resets: Flag::new(0),
                output,
                this: this.clone(),
            }
        });

        let member: Rc<dyn GroupMember> = inner.clone();
        transaction.register(Rc::downgrade(&member));

        Self { inner }
    }

    /// Create a linked sibling that tracks nothing.
    pub fn linked(&self) -> Self {
        self.clone_linked(AggregateOptions::default())
    }

    /// Create a linked sibling: same cells, same transaction window, but its
    /// own tracked keys, tracked contexts and subscribers.
    pub fn clone_linked(&self, options: AggregateOptions) -> Self {
        let sibling = Self::build(
            Rc::clone(&self.inner.cells),
            self.inner.transaction.clone(),
            options,
        );
        debug!(members = self.group_size(), "linked aggregate created");
        sibling
    }

    /// Number of live aggregates sharing this aggregate's transaction.
    pub fn group_size(&self) -> usize {
        self.inner.transaction.members()
    }

    /// Whether `other` belongs to the same linked group.
    pub fn is_linked_with(&self, other: &Aggregate<T>) -> bool {
        Rc::ptr_eq(&self.inner.cells, &other.inner.cells)
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Build a fresh snapshot from the current cell values.
    pub fn get(&self) -> Snapshot<T> {
        self.fields().snapshot()
    }

    /// A live handle over the member cells, the same kind subscribers
    /// receive.
    pub fn fields(&self) -> Fields<T> {
        Fields::new(Rc::clone(&self.inner.cells))
    }

    /// Current value of one member.
    pub fn value(&self, key: &str) -> Option<T> {
        self.inner.cells.get(key).map(Cell::get)
    }

    pub fn try_value(&self, key: &str) -> Result<T> {
        self.value(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_owned()))
    }

    /// The member cell registered under `key`.
    pub fn cell(&self, key: &str) -> Option<&Cell<T>> {
        self.inner.cells.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.cells.contains_key(key)
    }

    /// Member names in construction order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cells.is_empty()
    }

    /// The runtime notifications are delivered through.
    pub fn runtime(&self) -> &Runtime {
        self.inner.output.runtime()
    }

    /// An accessor that tracks every key it reads.
    pub fn view(&self) -> View<T> {
        View::new(self)
    }

    // ------------------------------------------------------------------------
    // Subscribing
    // ------------------------------------------------------------------------

    pub fn has_subscribers(&self) -> bool {
        self.inner.output.has_subscribers()
    }

    /// Subscribe and immediately receive the current fields.
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&Fields<T>, Option<&Context>) + 'static,
    {
        self.subscribe_with(on_value, || {}, true)
    }

    /// Subscribe with an invalidation callback, optionally skipping the
    /// initial call.
    pub fn subscribe_with<F, I>(&self, on_value: F, on_invalidate: I, run_first: bool) -> Subscription
    where
        F: Fn(&Fields<T>, Option<&Context>) + 'static,
        I: Fn() + 'static,
    {
        let on_value = Rc::new(on_value);
        let forward = Rc::clone(&on_value);
        let subscription = self.inner.output.subscribe_with(
            move |fields, context| (*forward)(fields, context),
            on_invalidate,
            false,
        );

        if run_first {
            (*on_value)(&self.fields(), None);
        }

        subscription
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Add `key` to the tracked keys. Returns `false` if it was already there.
    pub fn track_key(&self, key: impl Into<String>) -> bool {
        self.inner.tracked_keys.borrow_mut().insert(key.into())
    }

    /// Remove `key` from the tracked keys. Returns `false` if it was absent.
    pub fn untrack_key(&self, key: &str) -> bool {
        self.inner.tracked_keys.borrow_mut().shift_remove(key)
    }

    /// Tracked keys in insertion order.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.inner.tracked_keys.borrow().iter().cloned().collect()
    }

    pub fn set_track_all(&self, track_all: bool) {
        self.inner.track_all.set(track_all);
    }

    pub fn tracks_all(&self) -> bool {
        self.inner.track_all.get()
    }

    /// Track `key` for the given contexts, deduplicating fuzzy entries.
    pub fn track(&self, key: &str, contexts: impl IntoContexts) {
        self.track_with(key, contexts, TrackOptions::default());
    }

    /// Track `key` for the given contexts.
    ///
    /// Exact entries are always appended. A fuzzy entry is skipped when the
    /// context already matches an existing fuzzy entry for the key.
    pub fn track_with(&self, key: &str, contexts: impl IntoContexts, options: TrackOptions) {
        let contexts = contexts.into_contexts();
        if contexts.is_empty() {
            return;
        }

        let mut tracked = self.inner.tracked_contexts.borrow_mut();
        let entries = tracked.entry(key.to_owned()).or_default();

        for context in contexts {
            let covered = !options.exact
                && entries
                    .iter()
                    .any(|entry| !entry.is_exact() && entry.matches(&context));
            if covered {
                continue;
            }
            entries.push(ContextMatcher::new(&context, options.exact));
        }
    }

    /// Drop every tracked context for `key`. Returns how many were removed.
    pub fn untrack(&self, key: &str) -> usize {
        self.inner
            .tracked_contexts
            .borrow_mut()
            .shift_remove(key)
            .map_or(0, |entries| entries.len())
    }

    /// Whether any context is tracked for `key`.
    pub fn has_tracked_contexts(&self, key: &str) -> bool {
        self.inner.tracked_contexts.borrow().contains_key(key)
    }

    /// Tracked context entries for `key`.
    pub fn tracked_contexts(&self, key: &str) -> Vec<ContextMatcher> {
        self.inner
            .tracked_contexts
            .borrow()
            .get(key)
            .map(|entries| entries.to_vec())
            .unwrap_or_default()
    }

    /// Whether a change to `key` carrying `contexts` passes this aggregate's
    /// filter.
    pub fn is_tracking(&self, key: &str, contexts: impl IntoContexts) -> bool {
        self.inner.is_tracking(key, &contexts.into_contexts())
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Current depth of the shared transaction.
    pub fn depth(&self) -> usize {
        self.inner.transaction.depth()
    }

    /// Whether any member of the group has buffered changes.
    pub fn has_pending(&self) -> bool {
        self.inner.transaction.is_pending()
    }

    /// Open (or nest) a transaction window.
    pub fn open(&self) {
        self.inner.transaction.open();
    }

    /// Close one level. Closing the outermost level flushes the group.
    pub fn close(&self) {
        if self.inner.transaction.close() {
            self.flush();
        }
    }

    /// Resolve buffered changes for every aggregate in the group.
    pub fn flush(&self) {
        self.inner.transaction.flush();
    }

    /// Run `f` inside a transaction window.
    ///
    /// The window is closed even if `f` panics; in that case the buffered
    /// changes stay pending instead of being flushed during unwinding.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        self.open();
        let _guard = CloseOnDrop { aggregate: self };
        f()
    }
}

impl<T> AggregateInner<T>
where
    T: Clone + Distinct + 'static,
{
    fn is_tracking(&self, key: &str, contexts: &[Context]) -> bool {
        if self.track_all.get() || self.tracked_keys.borrow().contains(key) {
            return true;
        }
        if contexts.is_empty() {
            return false;
        }

        let tracked = self.tracked_contexts.borrow();
        let entries = tracked.get(key);
        contexts.iter().any(|context| {
            context.is_force()
                || entries.is_some_and(|entries| entries.iter().any(|entry| entry.matches(context)))
        })
    }

    /// Subscribe to every member cell. Runs when the first subscriber arrives.
    fn connect(&self) -> Deactivate {
        debug!(members = self.cells.len(), "aggregate activated");
        self.outstanding.set(0);
        self.batch.borrow_mut().clear();
        self.resets.set(self.output.runtime().resets());

        let subscriptions: Vec<Subscription> = self
            .cells
            .iter()
            .map(|(name, cell)| {
                let on_value = self.this.clone();
                let on_invalidate = self.this.clone();
                let name = name.clone();
                cell.subscribe_with(
                    move |_, context| {
                        if let Some(inner) = on_value.upgrade() {
                            inner.on_member_change(&name, context);
                        }
                    },
                    move || {
                        if let Some(inner) = on_invalidate.upgrade() {
                            inner.on_member_invalidate();
                        }
                    },
                    false,
                )
            })
            .collect();

        Box::new(move || {
            debug!(members = subscriptions.len(), "aggregate deactivated");
            for subscription in &subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    fn on_member_invalidate(&self) {
        // A panicking subscriber drops queued deliveries, some of which may
        // have been ours.
        let resets = self.output.runtime().resets();
        if self.resets.replace(resets) != resets {
            trace!(outstanding = self.outstanding.get(), "stale batch discarded");
            self.outstanding.set(0);
            self.batch.borrow_mut().clear();
        }
        self.outstanding.set(self.outstanding.get() + 1);
    }

    fn on_member_change(&self, name: &str, context: Option<&Context>) {
        let outstanding = self.outstanding.get().saturating_sub(1);
        self.outstanding.set(outstanding);

        let change = (name.to_owned(), context.cloned());
        if self.transaction.depth() > 0 {
            trace!(key = name, depth = self.transaction.depth(), "member change buffered");
            self.pending.borrow_mut().insert(change);
            self.transaction.mark_pending();
        } else {
            self.batch.borrow_mut().insert(change);
        }

        if outstanding == 0 {
            self.settle();
        }
    }

    /// Resolve the current batch once every member delivery has arrived.
    fn settle(&self) {
        let batch = std::mem::take(&mut *self.batch.borrow_mut());
        if batch.is_empty() {
            return;
        }

        if self.transaction.depth() > 0 {
            self.pending.borrow_mut().extend(batch);
            self.transaction.mark_pending();
            return;
        }

        let qualifying = batch
            .iter()
            .filter(|(name, context)| self.is_tracking(name, candidates(context)))
            .map(|(_, context)| context.clone())
            .last();

        match qualifying {
            Some(context) => {
                trace!(changes = batch.len(), "member changes published");
                self.publish(context);
            }
            None => trace!(changes = batch.len(), "member changes ignored"),
        }
    }

    fn publish(&self, context: Option<Context>) {
        let fields = Fields::new(Rc::clone(&self.cells));
        match context {
            Some(context) => self.output.set_with(fields, context),
            None => self.output.set(fields),
        }
    }
}

impl<T> GroupMember for AggregateInner<T>
where
    T: Clone + Distinct + 'static,
{
    fn flush_member(&self) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let qualifies = pending
            .iter()
            .any(|(name, context)| self.is_tracking(name, candidates(context)));

        if qualifies {
            self.publish(None);
        }
    }
}

fn candidates(context: &Option<Context>) -> &[Context] {
    context.as_ref().map(std::slice::from_ref).unwrap_or(&[])
}

/// Closes the transaction opened by [`Aggregate::transaction`].
struct CloseOnDrop<'a, T>
where
    T: Clone + Distinct + 'static,
{
    aggregate: &'a Aggregate<T>,
}

impl<T> Drop for CloseOnDrop<'_, T>
where
    T: Clone + Distinct + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.aggregate.inner.transaction.close();
        } else {
            self.aggregate.close();
        }
    }
}

impl<T> Clone for Aggregate<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Aggregate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("keys", &self.inner.cells.keys().collect::<Vec<_>>())
            .field("tracked_keys", &*self.inner.tracked_keys.borrow())
            .field("track_all", &self.inner.track_all.get())
            .field("transaction", &self.inner.transaction)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
