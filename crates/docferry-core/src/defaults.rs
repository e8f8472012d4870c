//! Centralized default constants for docferry.
//!
//! Status codes are opaque values taken from the existing ERP tables. They are
//! defaults only; every one of them can be overridden through configuration.

// =============================================================================
// STATUS CODES
// =============================================================================

/// `req_status` value marking a request as approved.
pub const APPROVED_CODE: &str = "A";

/// `download_status` value marking a candidate as ready to fetch.
pub const READY_CODE: &str = "1";

/// `download_status` value the destination row must hold to be acknowledged.
pub const WAITING_CODE: &str = "w";

/// `download_status` value written on acknowledgment.
pub const COMPLETE_CODE: &str = "1";

// =============================================================================
// QUERIES
// =============================================================================

/// Query subscribed to by the change watcher.
pub const WATCH_QUERY: &str =
    "SELECT attach_id, request_by FROM erp.document_download_queue2 WHERE selected = 'A'";

/// Notification channel raised by the trigger on the watched table.
pub const WATCH_CHANNEL: &str = "document_download_queue_changed";

/// Full read of the candidate relation.
pub const CANDIDATE_QUERY: &str = "SELECT req_status, download_status, blob_id, attached_document_id \
     FROM erp.temp_document_request";

/// Point lookup of one BLOB in the source database.
pub const EXTRACTION_QUERY: &str = "SELECT data FROM blob_sample WHERE id = $1";

/// Status-gated acknowledgment in the primary database.
pub const ACKNOWLEDGE_QUERY: &str = "UPDATE erp.document_download_queue \
     SET download_status = $1, ident = $2 \
     WHERE download_status = $3 AND attached_document_id = $4";

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Default primary database URL.
pub const PRIMARY_DATABASE_URL: &str = "postgres://localhost/erp";

/// Default source database URL.
pub const SOURCE_DATABASE_URL: &str = "postgres://localhost/blobs";

/// Default connect timeout per target, in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// WATCHER
// =============================================================================

/// First re-arm backoff delay (milliseconds).
pub const REARM_MIN_DELAY_MS: u64 = 250;

/// Upper bound for the re-arm backoff delay (milliseconds).
pub const REARM_MAX_DELAY_MS: u64 = 30_000;

/// Capacity of the watcher event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// STORAGE
// =============================================================================

/// Directory extracted BLOBs are written to.
pub const OUTPUT_DIR: &str = "./downloads";

/// Extension given to every extracted file.
pub const OUTPUT_EXTENSION: &str = "file";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;
