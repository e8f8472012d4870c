//! Core traits for docferry abstractions.
//!
//! These traits define the interfaces that the PostgreSQL implementations in
//! `docferry-db` satisfy, so the pipeline and watcher can be driven by
//! in-memory fakes in tests.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::DocumentRequest;

// =============================================================================
// PIPELINE TRAITS
// =============================================================================

/// Reads the candidate relation of the primary database.
#[async_trait]
pub trait DocumentQueueReader: Send + Sync {
    /// Return every visible candidate row in database order.
    async fn fetch_candidates(&self) -> Result<Vec<DocumentRequest>>;
}

/// Materializes BLOBs from the source database on local storage.
#[async_trait]
pub trait BlobExtractor: Send + Sync {
    /// Write the BLOB with this id to a new file.
    ///
    /// Returns the absolute path, or `None` if the source has no such BLOB.
    async fn extract(&self, blob_id: i64) -> Result<Option<PathBuf>>;
}

/// Writes the completion marker back to the primary database.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    /// Mark the destination row for `document_id` complete if it is waiting.
    ///
    /// Returns the number of rows changed. `None` for `file_path` is a no-op
    /// returning 0.
    async fn acknowledge(&self, document_id: &str, file_path: Option<&Path>) -> Result<u64>;
}

// =============================================================================
// CHANGE NOTIFICATION
// =============================================================================

/// A one-shot registration of interest in a query's result set.
///
/// Deliberately neither `Clone` nor `Copy`: [`ChangeSource::fired`] takes it
/// by value, so a subscription that has fired cannot be waited on again.
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    generation: u64,
    query: String,
    channel: String,
    row_count: usize,
}

impl Subscription {
    pub fn new(
        generation: u64,
        query: impl Into<String>,
        channel: impl Into<String>,
        row_count: usize,
    ) -> Self {
        Self {
            generation,
            query: query.into(),
            channel: channel.into(),
            row_count,
        }
    }

    /// Monotonic arm counter of the source that issued this subscription.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Rows returned by the query when the subscription was armed.
    pub fn row_count(&self) -> usize {
        self.row_count
    }
}

/// Delivered when a subscription fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub generation: u64,
    pub channel: String,
    pub payload: String,
}

/// A database-side change notification mechanism.
///
/// Implementations own their connection; it is never shared with pipeline
/// passes.
#[async_trait]
pub trait ChangeSource: Send {
    /// Execute `query`, make sure its channel is listened to, and return a
    /// fresh subscription.
    async fn arm(&mut self, query: &str) -> Result<Subscription>;

    /// Wait until `subscription` fires. The subscription is consumed either way.
    async fn fired(&mut self, subscription: Subscription) -> Result<ChangeNotice>;

    /// Drop every registration and release the connection.
    async fn close(self) -> Result<()>;
}
