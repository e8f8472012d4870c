//! Status-gated acknowledgment of transferred documents.

use std::path::Path;

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use tracing::{debug, info};

use docferry_core::{defaults, Error, Result, StatusCodes, StatusUpdater};

use crate::connection::{release, TargetConfig};

/// PostgreSQL implementation of [`StatusUpdater`].
///
/// The update only matches rows still holding the waiting code, so
/// re-acknowledging a completed document changes nothing and is not an error.
pub struct PgStatusUpdater {
    primary: TargetConfig,
    codes: StatusCodes,
    query: String,
}

impl PgStatusUpdater {
    pub fn new(primary: TargetConfig, codes: StatusCodes) -> Self {
        Self {
            primary,
            codes,
            query: defaults::ACKNOWLEDGE_QUERY.to_string(),
        }
    }

    /// Acknowledge with a different statement. Parameters, in order: the
    /// completion code, the identifier string, the waiting code, the document id.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Run the conditional update over an existing connection.
    pub async fn acknowledge_with(
        &self,
        conn: &mut PgConnection,
        document_id: &str,
        ident: &str,
    ) -> Result<u64> {
        let result = sqlx::query(&self.query)
            .bind(&self.codes.complete)
            .bind(ident)
            .bind(&self.codes.waiting)
            .bind(document_id)
            .execute(&mut *conn)
            .await
            .map_err(|source| Error::Update {
                document_id: document_id.to_string(),
                source,
            })?;
        Ok(result.rows_affected())
    }
}

/// Identifier stored with an acknowledged row: the file name of the BLOB.
pub fn ident_for(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("no usable file name in {}", path.display())))
}

#[async_trait]
impl StatusUpdater for PgStatusUpdater {
    async fn acknowledge(&self, document_id: &str, file_path: Option<&Path>) -> Result<u64> {
        let Some(path) = file_path else {
            return Ok(0);
        };
        let ident = ident_for(path)?;

        let mut conn = self.primary.connect().await?;
        let result = self.acknowledge_with(&mut conn, document_id, ident).await;
        release(conn, self.primary.target).await;
        let rows_affected = result?;

        if rows_affected == 0 {
            debug!(
                subsystem = "db",
                component = "status_updater",
                op = "acknowledge",
                document_id,
                "No waiting row; already acknowledged or not queued"
            );
        } else {
            info!(
                subsystem = "db",
                component = "status_updater",
                op = "acknowledge",
                document_id,
                ident,
                rows_affected,
                "Document acknowledged"
            );
        }
        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ident_is_file_name() {
        let path = PathBuf::from("/srv/downloads/0192f5c1-aaaa-7bbb-8ccc-123456789abc.file");
        assert_eq!(
            ident_for(&path).unwrap(),
            "0192f5c1-aaaa-7bbb-8ccc-123456789abc.file"
        );
    }

    #[test]
    fn test_ident_rejects_path_without_file_name() {
        assert!(matches!(ident_for(Path::new("/")), Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_acknowledge_without_path_is_noop() {
        // Unreachable target: any connection attempt would fail.
        let updater = PgStatusUpdater::new(
            TargetConfig::primary("postgres://u:p@127.0.0.1:1/erp"),
            StatusCodes::default(),
        );
        assert_eq!(updater.acknowledge("D1", None).await.unwrap(), 0);
    }
}
