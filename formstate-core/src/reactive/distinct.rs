//! Change Detection
//!
//! A cell only notifies when a write is "different" from what it holds. The
//! rule is deliberately conservative:
//!
//! - Primitive values (integers, booleans, chars, text) are compared by
//!   equality.
//! - Floats compare by equality, except that NaN is treated as equal to NaN
//!   so that repeatedly writing NaN does not spin.
//! - Compound values (vectors, maps, boxed and shared values, user structs)
//!   are always different, even when structurally equal. A value that was
//!   mutated in place and written back still propagates.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use indexmap::IndexMap;

/// Inequality test used by cells to decide whether a write notifies.
pub trait Distinct {
    /// Returns `true` when `other` should be treated as a change.
    fn is_distinct(&self, other: &Self) -> bool;
}

macro_rules! distinct_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Distinct for $ty {
                #[inline]
                fn is_distinct(&self, other: &Self) -> bool {
                    self != other
                }
            }
        )*
    };
}

distinct_by_eq!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String,
    &'static str,
);

macro_rules! distinct_float {
    ($($ty:ty),*) => {
        $(
            impl Distinct for $ty {
                #[inline]
                fn is_distinct(&self, other: &Self) -> bool {
                    !(self == other || (self.is_nan() && other.is_nan()))
                }
            }
        )*
    };
}

distinct_float!(f32, f64);

impl<T: Distinct> Distinct for Option<T> {
    fn is_distinct(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => false,
            (Some(a), Some(b)) => a.is_distinct(b),
            _ => true,
        }
    }
}

/// Implement [`Distinct`] for types that must always count as changed.
///
/// Use this for struct-like values stored in cells.
#[macro_export]
macro_rules! always_distinct {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::reactive::Distinct for $ty {
                #[inline]
                fn is_distinct(&self, _other: &Self) -> bool {
                    true
                }
            }
        )*
    };
}

impl<T> Distinct for Vec<T> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<T: ?Sized> Distinct for Box<T> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<T: ?Sized> Distinct for Rc<T> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<K, V, S> Distinct for HashMap<K, V, S> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<K, V> Distinct for BTreeMap<K, V> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}

impl<K, V, S> Distinct for IndexMap<K, V, S> {
    fn is_distinct(&self, _other: &Self) -> bool {
        true
    }
}
