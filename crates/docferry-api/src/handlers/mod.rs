//! HTTP handlers for docferry-api.
//!
//! The server is the host for the two core components: it triggers pipeline
//! passes on request and exposes the watcher's change counter and events.

pub mod changes;
pub mod passes;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use docferry_core::ChangeFeed;
use docferry_db::OutputDirectory;
use docferry_jobs::DocumentPipeline;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DocumentPipeline>,
    /// Feed the watcher publishes to. Present even when the watcher is off,
    /// so the counter simply stays at zero.
    pub feed: ChangeFeed,
    pub output: OutputDirectory,
    pub watcher_enabled: bool,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/passes", post(passes::run_pass))
        .route("/api/v1/changes", get(changes::change_count))
        .route("/api/v1/changes/stream", get(changes::change_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl IntoResponse {
    let output = match state.output.validate().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Output directory health check failed");
            e
        }
    };
    let healthy = output == "ok";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "output_dir": output,
            "watcher": if state.watcher_enabled { "enabled" } else { "disabled" },
        })),
    )
}

/// Error returned by handlers.
pub enum ApiError {
    /// A database target could not be reached.
    Unavailable(docferry_core::Error),
    Internal(docferry_core::Error),
}

impl From<docferry_core::Error> for ApiError {
    fn from(err: docferry_core::Error) -> Self {
        match err {
            docferry_core::Error::Connection { .. } => ApiError::Unavailable(err),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unavailable(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
