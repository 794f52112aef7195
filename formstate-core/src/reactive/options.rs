//! Aggregate and tracking options.
//!
//! Options are plain data so they can be written inline or loaded from JSON
//! alongside a form definition.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Construction options for an aggregate (or a linked clone).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregateOptions {
    /// Keys that notify on every change.
    pub tracked_keys: Vec<String>,
    /// Treat every key as tracked.
    pub track_all: bool,
}

impl AggregateOptions {
    /// Track every key.
    pub fn all() -> Self {
        Self {
            tracked_keys: Vec::new(),
            track_all: true,
        }
    }

    /// Track the given keys.
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            tracked_keys: keys.into_iter().map(Into::into).collect(),
            track_all: false,
        }
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options for [`Aggregate::track_with`](super::Aggregate::track_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOptions {
    /// Require literal equality and skip deduplication.
    pub exact: bool,
}

impl TrackOptions {
    pub fn exact() -> Self {
        Self { exact: true }
    }
}
