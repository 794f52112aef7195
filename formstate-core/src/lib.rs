//! Formstate Core
//!
//! This crate provides the reactive store that form controls are built on.
//! It implements:
//!
//! - Cells: single reactive values with lazy activation
//! - Aggregates: named collections of cells with selective, context-aware
//!   subscriptions and transactional batching
//! - Linked groups: aggregates sharing one transaction window
//! - Views: read-triggered dependency tracking
//!
//! The engine is single-threaded and fully synchronous. Reentrant writes
//! from inside subscribers are queued and delivered in order after the
//! current notification pass.
//!
//! # Architecture
//!
//! - `reactive`: the runtime, cells, aggregates and views
//! - `value`: a dynamic value type for heterogeneous forms
//! - `error`: error types for fallible lookups and option loading
//!
//! # Example
//!
//! ```rust
//! use formstate_core::reactive::{Aggregate, AggregateOptions, Runtime};
//!
//! let runtime = Runtime::new();
//! let email = runtime.cell(String::new());
//! let age = runtime.cell(String::new());
//!
//! let form = Aggregate::with_options(
//!     [("email", email.clone()), ("age", age.clone())],
//!     AggregateOptions::all(),
//! );
//!
//! let subscription = form.subscribe(|fields, _| {
//!     println!("form changed: {fields:?}");
//! });
//!
//! // One notification for both writes.
//! form.transaction(|| {
//!     email.set("ada@example.com".into());
//!     age.set("36".into());
//! });
//!
//! subscription.unsubscribe();
//! ```

pub mod error;
pub mod reactive;
pub mod value;

pub use error::{Result, StoreError};
pub use value::Value;
