//! docferry HTTP server.
//!
//! Runs the change watcher in the background and exposes pipeline passes,
//! the change counter and the watcher event stream over HTTP.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docferry_core::{defaults, ChangeFeed, Target};
use docferry_db::{OutputDirectory, TargetConfig};
use docferry_jobs::{ChangeWatcher, DocumentPipeline, PipelineConfig, WatcherConfig};

use handlers::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "docferry_api=debug,docferry_jobs=debug,docferry_db=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docferry-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);
    let output_dir =
        std::env::var("DOCFERRY_OUTPUT_DIR").unwrap_or_else(|_| defaults::OUTPUT_DIR.to_string());

    let primary = TargetConfig::from_env(Target::Primary);
    let source = TargetConfig::from_env(Target::Source);
    info!(
        primary = %primary.redacted_url(),
        source = %source.redacted_url(),
        "Database targets configured"
    );

    let output = OutputDirectory::prepare(&output_dir)
        .await
        .with_context(|| format!("preparing output directory {}", output_dir))?;
    if let Err(e) = output.validate().await {
        anyhow::bail!("output directory {} is not usable: {}", output.path().display(), e);
    }
    info!(path = %output.path().display(), "Output directory ready");

    let pipeline_config = PipelineConfig::from_env();
    let pipeline = DocumentPipeline::postgres(
        primary.clone(),
        source,
        output.clone(),
        pipeline_config,
    );

    // Start the change watcher on its own connection
    let feed = ChangeFeed::default();
    let watcher_config = WatcherConfig::from_env();
    let watcher_enabled = watcher_config.enabled;
    let watcher = if watcher_enabled {
        let handle = ChangeWatcher::connect(&primary, watcher_config)
            .await
            .context("connecting change watcher")?
            .with_feed(feed.clone())
            .start()
            .await
            .context("starting change watcher")?;
        Some(handle)
    } else {
        info!("Change watcher disabled (DOCFERRY_WATCH_ENABLED=false)");
        None
    };

    let state = AppState {
        pipeline: Arc::new(pipeline),
        feed,
        output,
        watcher_enabled,
    };
    let app = handlers::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = watcher {
        handle.stop().await?;
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler, run until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
