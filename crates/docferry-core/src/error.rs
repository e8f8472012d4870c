//! Error types for docferry.

use std::fmt;

use thiserror::Error;

/// Result type alias using docferry's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The two independent databases docferry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Hosts the watched queue, the candidate relation and the destination table.
    Primary,
    /// Hosts the BLOB table.
    Source,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Primary => "primary",
            Target::Source => "source",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for docferry operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A connection target could not be reached (or dropped mid-operation).
    #[error("Connection error ({target}): {source}")]
    Connection {
        target: Target,
        #[source]
        source: sqlx::Error,
    },

    /// The query cannot be used for change notification.
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// A read query failed to execute or decode.
    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    /// A BLOB was found but could not be written to local storage.
    #[error("Extraction error for blob {blob_id}: {source}")]
    Extraction {
        blob_id: i64,
        #[source]
        source: std::io::Error,
    },

    /// The conditional acknowledgment update failed.
    #[error("Update error for document {document_id}: {source}")]
    Update {
        document_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed outside of an extraction
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a connect-time failure for the given target.
    pub fn connection(target: Target, source: sqlx::Error) -> Self {
        Error::Connection { target, source }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Only connection-level faults qualify. Query and update errors that
    /// come from the server (bad SQL, constraint violations) do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::Query(e) | Error::Update { source: e, .. } => is_transient_sqlx(e),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
