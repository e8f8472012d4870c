//! One document transfer pass: read candidates, extract, acknowledge.
//!
//! Each candidate row is an isolated unit of work. A row that fails to
//! extract or acknowledge is recorded in the [`PassSummary`] and the pass
//! moves on to the next row; only failing to read the candidates aborts the
//! whole pass.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, trace, warn};

use docferry_core::{
    BlobExtractor, DocumentQueueReader, DocumentRequest, FailureStage, PassSummary, Result,
    RowOutcome, RowReport, SkipReason, StatusCodes, StatusUpdater, TransferResult,
};
use docferry_db::{
    OutputDirectory, PgBlobExtractor, PgDocumentQueueReader, PgStatusUpdater, TargetConfig,
};

/// Configuration for document passes.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Status vocabulary used for eligibility and acknowledgment.
    pub codes: StatusCodes,
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// See [`StatusCodes::from_env`] for the variables read.
    pub fn from_env() -> Self {
        Self {
            codes: StatusCodes::from_env(),
        }
    }

    /// Use a different status vocabulary.
    pub fn with_codes(mut self, codes: StatusCodes) -> Self {
        self.codes = codes;
        self
    }
}

/// Runs transfer passes on demand.
///
/// Holds no mutable state, so one pipeline can be shared behind an `Arc` and
/// even run overlapping passes.
pub struct DocumentPipeline {
    reader: Arc<dyn DocumentQueueReader>,
    extractor: Arc<dyn BlobExtractor>,
    updater: Arc<dyn StatusUpdater>,
    config: PipelineConfig,
}

impl DocumentPipeline {
    pub fn new(
        reader: impl DocumentQueueReader + 'static,
        extractor: impl BlobExtractor + 'static,
        updater: impl StatusUpdater + 'static,
        config: PipelineConfig,
    ) -> Self {
        Self {
            reader: Arc::new(reader),
            extractor: Arc::new(extractor),
            updater: Arc::new(updater),
            config,
        }
    }

    /// Pipeline over the PostgreSQL components.
    pub fn postgres(
        primary: TargetConfig,
        source: TargetConfig,
        output: OutputDirectory,
        config: PipelineConfig,
    ) -> Self {
        let updater = PgStatusUpdater::new(primary.clone(), config.codes.clone());
        Self::new(
            PgDocumentQueueReader::new(primary),
            PgBlobExtractor::new(source, output),
            updater,
            config,
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one pass over the current candidates.
    ///
    /// Returns `Err` only when the candidates cannot be read.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "pipeline"))]
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let start = Instant::now();

        let candidates = self.reader.fetch_candidates().await.map_err(|e| {
            warn!(error = %e, "Pass aborted: candidates could not be read");
            e
        })?;
        debug!(row_count = candidates.len(), "Candidates fetched");

        let mut summary = PassSummary::default();
        for request in candidates {
            let outcome = self.process_row(&request).await;
            trace!(?request, ?outcome, "Row done");
            summary.record(RowReport {
                blob_id: request.blob_id,
                attached_document_id: request.attached_document_id,
                outcome,
            });
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            acknowledged = summary.acknowledged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pass completed"
        );
        Ok(summary)
    }

    async fn process_row(&self, request: &DocumentRequest) -> RowOutcome {
        if !request.is_eligible(&self.config.codes) {
            return RowOutcome::Skipped {
                reason: SkipReason::Ineligible,
            };
        }

        let path = match self.transfer(request.blob_id).await {
            TransferResult::Extracted(path) => path,
            TransferResult::NotFound => {
                debug!(blob_id = ?request.blob_id, "No BLOB for eligible row");
                return RowOutcome::Skipped {
                    reason: SkipReason::BlobNotFound,
                };
            }
            TransferResult::Failed(e) => {
                warn!(blob_id = ?request.blob_id, error = %e, "Extraction failed");
                return RowOutcome::Failed {
                    stage: FailureStage::Extract,
                    error: e.to_string(),
                };
            }
        };

        match self
            .acknowledge(request.attached_document_id.as_deref(), &path)
            .await
        {
            Ok(rows_affected) => RowOutcome::Processed {
                file_path: path,
                rows_affected,
            },
            Err(e) => {
                // The file stays on disk; the next pass extracts again.
                warn!(
                    document_id = ?request.attached_document_id,
                    path = %path.display(),
                    error = %e,
                    "Acknowledgment failed"
                );
                RowOutcome::Failed {
                    stage: FailureStage::Acknowledge,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn transfer(&self, blob_id: Option<i64>) -> TransferResult {
        let Some(blob_id) = blob_id else {
            return TransferResult::NotFound;
        };
        match self.extractor.extract(blob_id).await {
            Ok(Some(path)) => TransferResult::Extracted(path),
            Ok(None) => TransferResult::NotFound,
            Err(e) => TransferResult::Failed(e),
        }
    }

    async fn acknowledge(&self, document_id: Option<&str>, path: &Path) -> Result<u64> {
        match document_id {
            Some(document_id) => self.updater.acknowledge(document_id, Some(path)).await,
            // A NULL key matches no destination row.
            None => Ok(0),
        }
    }
}
