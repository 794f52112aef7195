//! Error types for the store.
//!
//! The notification path itself never fails: `set`, `subscribe`, `track` and
//! `unsubscribe` are infallible. Errors only surface from lookups by name and
//! from loading options.

use thiserror::Error;

/// Errors returned by fallible store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A name was looked up that is not a member of the aggregate.
    #[error("unknown key `{0}`")]
    UnknownKey(String),

    /// Two cells were registered under the same name.
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),

    /// Options could not be decoded.
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
