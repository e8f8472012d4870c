//! Candidate reader for the document-request relation.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;
use tracing::{debug, trace};

use docferry_core::{defaults, DocumentQueueReader, DocumentRequest, Error, QueueRow, Result};

use crate::connection::{release, TargetConfig};

/// PostgreSQL implementation of [`DocumentQueueReader`].
///
/// Opens one connection on the primary target per pass and closes it as soon
/// as the rows are read.
pub struct PgDocumentQueueReader {
    primary: TargetConfig,
    query: String,
}

impl PgDocumentQueueReader {
    pub fn new(primary: TargetConfig) -> Self {
        Self {
            primary,
            query: defaults::CANDIDATE_QUERY.to_string(),
        }
    }

    /// Read candidates with a different query. It must expose `req_status`,
    /// `download_status`, `blob_id` and `attached_document_id`.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Read every candidate over an existing connection, in database order.
    pub async fn fetch_candidates_with(
        &self,
        conn: &mut PgConnection,
    ) -> Result<Vec<DocumentRequest>> {
        let start = Instant::now();
        let rows = sqlx::query(&self.query)
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::Query)?;

        let requests = rows
            .iter()
            .map(parse_request_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Query)?;

        debug!(
            subsystem = "db",
            component = "queue_reader",
            op = "fetch_candidates",
            row_count = requests.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Candidates read"
        );
        for request in &requests {
            trace!(?request, "candidate");
        }
        Ok(requests)
    }
}

#[async_trait]
impl DocumentQueueReader for PgDocumentQueueReader {
    async fn fetch_candidates(&self) -> Result<Vec<DocumentRequest>> {
        let mut conn = self.primary.connect().await?;
        let result = self.fetch_candidates_with(&mut conn).await;
        release(conn, self.primary.target).await;
        result
    }
}

/// Decode one candidate row. Status columns are read as text whatever their
/// declared character type.
pub(crate) fn parse_request_row(row: &PgRow) -> std::result::Result<DocumentRequest, sqlx::Error> {
    Ok(DocumentRequest {
        req_status: row.try_get("req_status")?,
        download_status: row.try_get("download_status")?,
        blob_id: row.try_get("blob_id")?,
        attached_document_id: row.try_get("attached_document_id")?,
    })
}

/// Decode one row of the watched queue.
pub(crate) fn parse_queue_row(row: &PgRow) -> std::result::Result<QueueRow, sqlx::Error> {
    Ok(QueueRow {
        attach_id: row.try_get("attach_id")?,
        request_by: row.try_get("request_by")?,
    })
}
