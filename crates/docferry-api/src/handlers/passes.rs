//! Pipeline pass trigger.

use axum::{extract::State, Json};

use docferry_core::PassSummary;

use super::{ApiError, AppState};

/// Run one pass and return its summary.
///
/// Row-level failures are in the summary; only a pass that could not read
/// its candidates is an error response.
pub async fn run_pass(State(state): State<AppState>) -> Result<Json<PassSummary>, ApiError> {
    let summary = state.pipeline.run_pass().await.map_err(|e| {
        tracing::error!(error = %e, "Pass failed");
        ApiError::from(e)
    })?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use docferry_core::DocumentRequest;

    use crate::handlers::tests::{send, test_state, ReaderMode};

    fn post_pass() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/passes")
            .body(Body::empty())
            .unwrap()
    }

    fn request(req: &str, blob_id: i64, doc: &str) -> DocumentRequest {
        DocumentRequest {
            req_status: Some(req.to_string()),
            download_status: Some("1".to_string()),
            blob_id: Some(blob_id),
            attached_document_id: Some(doc.to_string()),
        }
    }

    #[tokio::test]
    async fn test_run_pass_returns_summary() {
        let (tmp, state) = test_state(ReaderMode::Rows(vec![
            request("A", 42, "D1"),
            request("P", 43, "D2"),
            request("A", 404, "D3"),
        ]))
        .await;

        let (status, body) = send(state, post_pass()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], 1);
        assert_eq!(body["skipped"], 2);
        assert_eq!(body["failed"], 0);
        assert_eq!(body["acknowledged"], 1);
        assert_eq!(body["rows"][0]["outcome"], "processed");
        assert_eq!(body["rows"][1]["reason"], "ineligible");
        assert_eq!(body["rows"][2]["reason"], "blob_not_found");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_run_pass_unreachable_primary_is_bad_gateway() {
        let (_tmp, state) = test_state(ReaderMode::Unreachable).await;

        let (status, body) = send(state, post_pass()).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Connection error (primary)"));
    }

    #[tokio::test]
    async fn test_run_pass_query_failure_is_internal_error() {
        let (_tmp, state) = test_state(ReaderMode::BadQuery).await;

        let (status, body) = send(state, post_pass()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Query error"));
    }

    #[tokio::test]
    async fn test_run_pass_requires_post() {
        let (_tmp, state) = test_state(ReaderMode::Rows(Vec::new())).await;
        let request = Request::builder()
            .uri("/api/v1/passes")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(state, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
