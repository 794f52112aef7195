//! Shared Transaction Window
//!
//! Every aggregate owns a handle to a transaction. Linked aggregates share
//! the same one, so opening a window on any of them buffers changes for all
//! of them and flushing any of them flushes the whole group.
//!
//! The transaction keeps only weak references to its members. Dropped
//! aggregates are pruned on the next registration or flush.

use std::cell::{Cell as Flag, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

/// A participant in a linked group.
pub(crate) trait GroupMember {
    /// Resolve buffered changes: notify if any of them passes this member's
    /// filter, then forget them.
    fn flush_member(&self);
}

#[derive(Default)]
struct TransactionInner {
    depth: Flag<usize>,
    pending: Flag<bool>,
    members: RefCell<Vec<Weak<dyn GroupMember>>>,
}

/// A reentrant open/close counter shared by a linked group of aggregates.
#[derive(Clone, Default)]
pub(crate) struct Transaction {
    inner: Rc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, member: Weak<dyn GroupMember>) {
        let mut members = self.inner.members.borrow_mut();
        members.retain(|existing| existing.strong_count() > 0);
        members.push(member);
    }

    pub(crate) fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.inner.pending.get()
    }

    pub(crate) fn mark_pending(&self) {
        self.inner.pending.set(true);
    }

    /// Number of live members.
    pub(crate) fn members(&self) -> usize {
        self.inner
            .members
            .borrow()
            .iter()
            .filter(|member| member.strong_count() > 0)
            .count()
    }

    pub(crate) fn open(&self) -> usize {
        let depth = self.inner.depth.get() + 1;
        self.inner.depth.set(depth);
        debug!(depth, "transaction opened");
        depth
    }

    /// Decrement the depth, never below zero.
    ///
    /// Returns `true` when this call closed the outermost window.
    pub(crate) fn close(&self) -> bool {
        let depth = self.inner.depth.get();
        if depth == 0 {
            return false;
        }
        self.inner.depth.set(depth - 1);
        debug!(depth = depth - 1, "transaction closed");
        depth == 1
    }

    /// Flush every live member, regardless of depth.
    pub(crate) fn flush(&self) {
        let members: Vec<Rc<dyn GroupMember>> = {
            let mut members = self.inner.members.borrow_mut();
            members.retain(|member| member.strong_count() > 0);
            members.iter().filter_map(Weak::upgrade).collect()
        };
        self.inner.pending.set(false);

        debug!(members = members.len(), depth = self.depth(), "flushing group");
        for member in members {
            member.flush_member();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("depth", &self.depth())
            .field("pending", &self.is_pending())
            .field("members", &self.members())
            .finish()
    }
}
