//! Live Field Access
//!
//! Aggregate subscribers receive a [`Fields`] handle rather than a copied
//! map. Every read goes to the member cells, so a subscriber that keeps the
//! handle and looks at it later sees the values as they are then, not as
//! they were when it was called. Use [`Fields::snapshot`] to freeze them.

use std::fmt::{self, Debug};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::aggregate::Snapshot;
use super::cell::Cell;
use super::distinct::Distinct;

/// A read-only, live view of an aggregate's member cells.
pub struct Fields<T> {
    cells: Rc<IndexMap<String, Cell<T>>>,
}

impl<T> Fields<T>
where
    T: Clone + Distinct + 'static,
{
    pub(crate) fn new(cells: Rc<IndexMap<String, Cell<T>>>) -> Self {
        Self { cells }
    }

    /// Current value of one member.
    pub fn get(&self, key: &str) -> Option<T> {
        self.cells.get(key).map(Cell::get)
    }

    /// Copy the current values, in member order.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.cells
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cells.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<T> Clone for Fields<T> {
    fn clone(&self) -> Self {
        Self {
            cells: Rc::clone(&self.cells),
        }
    }
}

// Every publish must reach subscribers even though the handle is the same.
impl<T> Distinct for Fields<T> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> PartialEq<Snapshot<T>> for Fields<T>
where
    T: PartialEq + Clone + Distinct + 'static,
{
    fn eq(&self, other: &Snapshot<T>) -> bool {
        self.cells.len() == other.len()
            && self.cells.iter().all(|(name, cell)| {
                other
                    .get(name)
                    .is_some_and(|expected| cell.with(|value| value == expected))
            })
    }
}

impl<T> Debug for Fields<T>
where
    T: Debug + Clone + Distinct + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, cell) in self.cells.iter() {
            cell.with(|value| {
                map.entry(name, value);
            });
        }
        map.finish()
    }
}

impl<T> Serialize for Fields<T>
where
    T: Serialize + Clone + Distinct + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in self.cells.iter() {
            cell.with(|value| map.serialize_entry(name, value))?;
        }
        map.end()
    }
}
