//! Records read from the databases and the outcomes of a pipeline pass.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// One row of the watched download queue.
///
/// Decoded while arming a subscription and dropped right after; the watcher
/// only cares that the result set exists, not what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRow {
    pub attach_id: String,
    pub request_by: Option<String>,
}

/// One row of the candidate relation, as read at the start of a pass.
///
/// Never mutated locally; state transitions happen only by writing back to
/// the primary database.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// Workflow stage code.
    pub req_status: Option<String>,
    /// Transfer stage code.
    pub download_status: Option<String>,
    /// Key into the source database's BLOB table.
    pub blob_id: Option<i64>,
    /// Key of the destination row to acknowledge.
    pub attached_document_id: Option<String>,
}

impl DocumentRequest {
    /// Whether this request is approved and ready to be fetched.
    pub fn is_eligible(&self, codes: &StatusCodes) -> bool {
        self.req_status.as_deref() == Some(codes.approved.as_str())
            && self.download_status.as_deref() == Some(codes.ready.as_str())
    }
}

/// The opaque status vocabulary of the ERP tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodes {
    /// `req_status` of an approved request.
    pub approved: String,
    /// `download_status` of a candidate ready to fetch.
    pub ready: String,
    /// `download_status` a destination row must hold to be acknowledged.
    pub waiting: String,
    /// `download_status` written on acknowledgment.
    pub complete: String,
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self {
            approved: defaults::APPROVED_CODE.to_string(),
            ready: defaults::READY_CODE.to_string(),
            waiting: defaults::WAITING_CODE.to_string(),
            complete: defaults::COMPLETE_CODE.to_string(),
        }
    }
}

impl StatusCodes {
    /// Create codes from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DOCFERRY_APPROVED_CODE` | `A` |
    /// | `DOCFERRY_READY_CODE` | `1` |
    /// | `DOCFERRY_WAITING_CODE` | `w` |
    /// | `DOCFERRY_COMPLETE_CODE` | `1` |
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            approved: var("DOCFERRY_APPROVED_CODE", defaults::APPROVED_CODE),
            ready: var("DOCFERRY_READY_CODE", defaults::READY_CODE),
            waiting: var("DOCFERRY_WAITING_CODE", defaults::WAITING_CODE),
            complete: var("DOCFERRY_COMPLETE_CODE", defaults::COMPLETE_CODE),
        }
    }
}

/// What happened when a BLOB was requested from the source database.
#[derive(Debug)]
pub enum TransferResult {
    /// The BLOB was written to this absolute path.
    Extracted(PathBuf),
    /// No row (or a NULL BLOB) for the identifier. Expected, not an error.
    NotFound,
    /// The lookup or the file write failed.
    Failed(crate::Error),
}

/// Why a candidate row was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Status fields do not mark the row approved and ready.
    Ineligible,
    /// Eligible, but the source database has no BLOB for it.
    BlobNotFound,
}

/// Stage at which a row failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Extract,
    Acknowledge,
}

/// Final state of one candidate row within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Processed {
        file_path: PathBuf,
        rows_affected: u64,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        stage: FailureStage,
        error: String,
    },
}

/// Per-row entry of a [`PassSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReport {
    pub blob_id: Option<i64>,
    pub attached_document_id: Option<String>,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

/// Aggregated result of one pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Eligible rows extracted and acknowledged (zero rows affected included).
    pub processed: u64,
    /// Ineligible rows plus eligible rows with no BLOB.
    pub skipped: u64,
    /// Eligible rows whose extraction or acknowledgment errored.
    pub failed: u64,
    /// Total destination rows changed by acknowledgment.
    pub acknowledged: u64,
    pub rows: Vec<RowReport>,
}

impl PassSummary {
    /// Record one row and bump the matching counter.
    pub fn record(&mut self, report: RowReport) {
        match &report.outcome {
            RowOutcome::Processed { rows_affected, .. } => {
                self.processed += 1;
                self.acknowledged += rows_affected;
            }
            RowOutcome::Skipped { .. } => self.skipped += 1,
            RowOutcome::Failed { .. } => self.failed += 1,
        }
        self.rows.push(report);
    }

    /// Number of candidate rows seen.
    pub fn total(&self) -> u64 {
        self.processed + self.skipped + self.failed
    }
}
