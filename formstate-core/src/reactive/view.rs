//! Dependency-Tracking View
//!
//! A [`View`] reads values out of an aggregate and, as a side effect, adds
//! every key it reads to the aggregate's tracked keys. A render function that
//! only touches `email` and `password` ends up subscribed to exactly those
//! two fields without listing them anywhere.
//!
//! Tracking is purely additive: a view never removes a key.

use std::fmt::{self, Debug};

use tracing::trace;

use crate::error::{Result, StoreError};

use super::aggregate::{Aggregate, Snapshot};
use super::distinct::Distinct;

/// A tracked accessor over an aggregate.
pub struct View<T> {
    aggregate: Aggregate<T>,
}

impl<T> View<T>
where
    T: Clone + Distinct + 'static,
{
    pub fn new(aggregate: &Aggregate<T>) -> Self {
        Self {
            aggregate: aggregate.clone(),
        }
    }

    /// Read `key` and start tracking it.
    ///
    /// Returns `None` (and tracks nothing) for names that are not members.
    pub fn get(&self, key: &str) -> Option<T> {
        let value = self.aggregate.value(key)?;
        if self.aggregate.track_key(key) {
            trace!(key, "view started tracking key");
        }
        Some(value)
    }

    /// Like [`View::get`], but reports unknown names as an error.
    pub fn try_get(&self, key: &str) -> Result<T> {
        self.get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_owned()))
    }

    /// Read every member, tracking all of them.
    pub fn get_all(&self) -> Snapshot<T> {
        let keys: Vec<String> = self.aggregate.keys().map(str::to_owned).collect();
        for key in keys {
            self.aggregate.track_key(key);
        }
        self.aggregate.get()
    }

    /// The aggregate this view reads from.
    pub fn aggregate(&self) -> &Aggregate<T> {
        &self.aggregate
    }
}

impl<T> Clone for View<T> {
    fn clone(&self) -> Self {
        Self {
            aggregate: self.aggregate.clone(),
        }
    }
}

impl<T: Debug> Debug for View<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("aggregate", &self.aggregate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;

    #[test]
    fn reading_a_key_tracks_it() {
        let runtime = Runtime::new();
        let aggregate = Aggregate::new([("a", runtime.cell(1)), ("b", runtime.cell(2))]);
        let view = aggregate.view();

        assert!(aggregate.tracked_keys().is_empty());
        assert_eq!(view.get("a"), Some(1));
        assert_eq!(aggregate.tracked_keys(), vec!["a".to_string()]);

        view.get("a");
        assert_eq!(aggregate.tracked_keys().len(), 1);
    }

    #[test]
    fn unknown_keys_are_not_tracked() {
        let runtime = Runtime::new();
        let aggregate = Aggregate::new([("a", runtime.cell(1))]);
        let view = View::new(&aggregate);

        assert_eq!(view.get("missing"), None);
        assert!(matches!(view.try_get("missing"), Err(StoreError::UnknownKey(_))));
        assert!(aggregate.tracked_keys().is_empty());
    }

    #[test]
    fn get_all_tracks_every_member() {
        let runtime = Runtime::new();
        let aggregate = Aggregate::new([("a", runtime.cell(1)), ("b", runtime.cell(2))]);

        let snapshot = aggregate.view().get_all();
        assert_eq!(snapshot["b"], 2);
        assert_eq!(aggregate.tracked_keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
