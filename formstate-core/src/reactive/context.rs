//! Change Contexts
//!
//! Every write to a cell may carry a context tag describing where the change
//! came from, typically a field name. Aggregates use these tags to decide
//! whether a change concerns them.
//!
//! # Matching
//!
//! An aggregate stores, per key, a list of [`ContextMatcher`]s:
//!
//! - `Exact(text)` matches a candidate whose text is identical.
//! - `Fuzzy(text)` matches when either text contains the other, so a matcher
//!   for `"address"` accepts `"address.street"` and `"addr"`.
//!
//! [`Context::Force`] matches every matcher and is used to push an update
//! through regardless of filters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A tag accompanying a value change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    /// Wildcard: always matches.
    Force,
    /// An arbitrary descriptive token.
    Tag(String),
}

impl Context {
    /// Create a tag context.
    pub fn tag(text: impl Into<String>) -> Self {
        Self::Tag(text.into())
    }

    /// Whether this is the forcing wildcard.
    pub fn is_force(&self) -> bool {
        matches!(self, Self::Force)
    }

    /// Text form used for comparisons.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Force => "true",
            Self::Tag(text) => text,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

impl From<&str> for Context {
    fn from(text: &str) -> Self {
        Self::Tag(text.to_owned())
    }
}

impl From<String> for Context {
    fn from(text: String) -> Self {
        Self::Tag(text)
    }
}

impl From<&String> for Context {
    fn from(text: &String) -> Self {
        Self::Tag(text.clone())
    }
}

/// `true` is the forcing wildcard; `false` is an ordinary tag.
impl From<bool> for Context {
    fn from(flag: bool) -> Self {
        if flag {
            Self::Force
        } else {
            Self::Tag("false".to_owned())
        }
    }
}

macro_rules! context_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Context {
                fn from(n: $ty) -> Self {
                    Self::Tag(n.to_string())
                }
            }
        )*
    };
}

context_from_number!(i32, i64, u32, u64, usize, f64);

/// Conversion into a list of contexts.
///
/// Lets `track` and `is_tracking` accept a single token, an array or vector
/// of tokens, an `Option`, or `()` for "no contexts".
pub trait IntoContexts {
    fn into_contexts(self) -> Vec<Context>;
}

impl IntoContexts for () {
    fn into_contexts(self) -> Vec<Context> {
        Vec::new()
    }
}

impl IntoContexts for Context {
    fn into_contexts(self) -> Vec<Context> {
        vec![self]
    }
}

impl IntoContexts for &Context {
    fn into_contexts(self) -> Vec<Context> {
        vec![self.clone()]
    }
}

impl IntoContexts for &str {
    fn into_contexts(self) -> Vec<Context> {
        vec![self.into()]
    }
}

impl IntoContexts for String {
    fn into_contexts(self) -> Vec<Context> {
        vec![self.into()]
    }
}

impl IntoContexts for bool {
    fn into_contexts(self) -> Vec<Context> {
        vec![self.into()]
    }
}

impl<C: Into<Context>> IntoContexts for Option<C> {
    fn into_contexts(self) -> Vec<Context> {
        self.map(Into::into).into_iter().collect()
    }
}

impl<C: Into<Context>, const N: usize> IntoContexts for [C; N] {
    fn into_contexts(self) -> Vec<Context> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<C: Into<Context>> IntoContexts for Vec<C> {
    fn into_contexts(self) -> Vec<Context> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<C: Clone + Into<Context>> IntoContexts for &[C] {
    fn into_contexts(self) -> Vec<Context> {
        self.iter().cloned().map(Into::into).collect()
    }
}

/// A tracked context entry for one aggregate key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "context", rename_all = "lowercase")]
pub enum ContextMatcher {
    /// Literal equality.
    Exact(String),
    /// Substring containment in either direction.
    Fuzzy(String),
}

impl ContextMatcher {
    /// Build a matcher from a context.
    pub fn new(context: &Context, exact: bool) -> Self {
        let text = context.as_text().to_owned();
        if exact {
            Self::Exact(text)
        } else {
            Self::Fuzzy(text)
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Exact(text) | Self::Fuzzy(text) => text,
        }
    }

    /// Test a candidate context against this entry.
    pub fn matches(&self, candidate: &Context) -> bool {
        if candidate.is_force() {
            return true;
        }
        let candidate = candidate.as_text();
        match self {
            Self::Exact(text) => text == candidate,
            Self::Fuzzy(text) => text.contains(candidate) || candidate.contains(text.as_str()),
        }
    }
}
