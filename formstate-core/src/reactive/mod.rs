//! Reactive Primitives
//!
//! This module implements the store engine: cells, aggregates over named
//! cells, linked groups of aggregates and dependency-tracking views.
//!
//! # Concepts
//!
//! ## Runtime
//!
//! A [`Runtime`] owns the notification queue. Every cell created from the
//! same runtime delivers through the same queue, which is what keeps
//! reentrant updates in order: a write issued from inside a subscriber is
//! appended to the running pass instead of starting a new one.
//!
//! ## Cells
//!
//! A [`Cell`] holds one value. It activates lazily on its first subscriber
//! and notifies only when a write is [`Distinct`] from the stored value.
//!
//! ## Aggregates
//!
//! An [`Aggregate`] combines named cells and filters member changes by
//! tracked keys and tracked [`Context`]s. Subscribers get a live [`Fields`]
//! handle; [`Aggregate::get`] copies the values into a [`Snapshot`]. Changes made
//! inside a transaction are buffered and published once on flush.
//! Aggregates created with [`Aggregate::clone_linked`] share the transaction
//! window but keep their own filters and subscribers.
//!
//! ## Views
//!
//! A [`View`] reads through an aggregate and tracks every key it touches.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded and synchronous. Handles are `Rc`
//! based, so none of these types are `Send`.

mod aggregate;
mod cell;
mod context;
mod distinct;
mod fields;
mod options;
mod runtime;
mod subscriber;
mod transaction;
mod view;

pub use aggregate::{Aggregate, Snapshot};
pub use cell::{Cell, Deactivate};
pub use context::{Context, ContextMatcher, IntoContexts};
pub use distinct::Distinct;
pub use fields::Fields;
pub use options::{AggregateOptions, TrackOptions};
pub use runtime::Runtime;
pub use subscriber::{OnInvalidate, OnValue, SubscriberId, Subscription};
pub use view::View;
