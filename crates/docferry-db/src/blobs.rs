//! BLOB extraction from the source database.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use docferry_core::{defaults, BlobExtractor, Error, Result};

use crate::connection::{release, TargetConfig};
use crate::output::OutputDirectory;

/// PostgreSQL implementation of [`BlobExtractor`].
///
/// Every call opens a fresh connection to the source target; there is no
/// reuse between calls.
pub struct PgBlobExtractor {
    source: TargetConfig,
    output: OutputDirectory,
    query: String,
}

impl PgBlobExtractor {
    pub fn new(source: TargetConfig, output: OutputDirectory) -> Self {
        Self {
            source,
            output,
            query: defaults::EXTRACTION_QUERY.to_string(),
        }
    }

    /// Look BLOBs up with a different query. It must take the id as `$1` and
    /// return the bytes in its first column.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn output(&self) -> &OutputDirectory {
        &self.output
    }

    async fn lookup(&self, blob_id: i64) -> Result<Option<Vec<u8>>> {
        let mut conn = self.source.connect().await?;
        let fetched: std::result::Result<Option<Option<Vec<u8>>>, sqlx::Error> =
            sqlx::query_scalar(&self.query)
                .bind(blob_id)
                .fetch_optional(&mut conn)
                .await;
        release(conn, self.source.target).await;

        // A matching row with a NULL column counts as no BLOB.
        Ok(fetched.map_err(Error::Query)?.flatten())
    }
}

#[async_trait]
impl BlobExtractor for PgBlobExtractor {
    async fn extract(&self, blob_id: i64) -> Result<Option<PathBuf>> {
        let start = Instant::now();

        let Some(bytes) = self.lookup(blob_id).await? else {
            debug!(
                subsystem = "db",
                component = "blob_extractor",
                op = "extract",
                blob_id,
                "BLOB not found"
            );
            return Ok(None);
        };

        let path = self.output.write_new(&bytes).await.map_err(|source| {
            warn!(
                subsystem = "db",
                component = "blob_extractor",
                blob_id,
                error = %source,
                "Failed to write BLOB to output directory"
            );
            Error::Extraction { blob_id, source }
        })?;

        info!(
            subsystem = "db",
            component = "blob_extractor",
            op = "extract",
            blob_id,
            bytes = bytes.len(),
            path = %path.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            "BLOB extracted"
        );
        Ok(Some(path))
    }
}
