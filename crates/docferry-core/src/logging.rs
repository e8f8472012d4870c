//! Structured logging field names for docferry.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, retry or skip applied |
//! | INFO  | Lifecycle events (startup, shutdown), pass completions |
//! | DEBUG | Decision points, subscription arming, config choices |
//! | TRACE | Per-row iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "watcher", "pipeline", "blob_extractor", "status_updater"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "arm", "fetch_candidates", "extract", "acknowledge"
pub const OPERATION: &str = "op";

/// Connection target ("primary" or "source").
pub const TARGET: &str = "db_target";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Source BLOB identifier.
pub const BLOB_ID: &str = "blob_id";

/// Destination document identifier.
pub const DOCUMENT_ID: &str = "document_id";

/// Subscription generation number.
pub const GENERATION: &str = "generation";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a query.
pub const ROW_COUNT: &str = "row_count";

/// Number of rows changed by an update.
pub const ROWS_AFFECTED: &str = "rows_affected";

/// Size in bytes of an extracted BLOB.
pub const BYTES: &str = "bytes";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
