//! # docferry-core
//!
//! Core types, traits, and abstractions for docferry.
//!
//! This crate provides the records read from the primary and source
//! databases, the pass summary, the error taxonomy, the change counter and
//! event feed, and the traits the database layer implements.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod query_shape;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result, Target};
pub use events::{ChangeCounter, ChangeFeed, WatcherEvent};
pub use models::*;
pub use query_shape::{validate_subscription_query, QueryShape};
pub use traits::*;
