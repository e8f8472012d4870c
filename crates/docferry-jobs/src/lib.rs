//! # docferry-jobs
//!
//! Document transfer passes and the change watcher for docferry.
//!
//! This crate provides:
//! - [`DocumentPipeline`]: one pass over the candidate relation, with
//!   per-row failure isolation
//! - [`ChangeWatcher`]: a self re-arming subscription that counts changes
//!   to the watched queue and retries re-arming with backoff
//!
//! The two never share a connection and can run concurrently.
//!
//! ## Example
//!
//! ```ignore
//! use docferry_jobs::{ChangeWatcher, DocumentPipeline, PipelineConfig, WatcherConfig};
//! use docferry_db::{OutputDirectory, TargetConfig};
//! use docferry_core::Target;
//!
//! let primary = TargetConfig::from_env(Target::Primary);
//! let source = TargetConfig::from_env(Target::Source);
//!
//! // Start watching the queue
//! let handle = ChangeWatcher::connect(&primary, WatcherConfig::from_env())
//!     .await?
//!     .start()
//!     .await?;
//!
//! // Run one pass on demand
//! let output = OutputDirectory::prepare("./downloads").await?;
//! let pipeline = DocumentPipeline::postgres(primary, source, output, PipelineConfig::from_env());
//! let summary = pipeline.run_pass().await?;
//! println!("{} processed, {} changes seen", summary.processed, handle.change_count());
//!
//! // Graceful shutdown
//! handle.stop().await?;
//! ```

pub mod pipeline;
pub mod watcher;

// Re-export core types
pub use docferry_core::*;

pub use pipeline::{DocumentPipeline, PipelineConfig};
pub use watcher::{ChangeWatcher, WatcherConfig, WatcherHandle};
