//! # docferry-db
//!
//! PostgreSQL access layer for docferry.
//!
//! This crate provides:
//! - Per-target connection configuration with scoped, short-lived connections
//! - The candidate reader, BLOB extractor and status updater used by passes
//! - The `LISTEN`/`NOTIFY` change source used by the watcher
//! - Schema migrations for the primary and source databases
//!
//! ## Example
//!
//! ```rust,ignore
//! use docferry_db::{OutputDirectory, PgBlobExtractor, TargetConfig};
//! use docferry_core::{BlobExtractor, Target};
//!
//! let source = TargetConfig::from_env(Target::Source);
//! let output = OutputDirectory::prepare("./downloads").await?;
//! let extractor = PgBlobExtractor::new(source, output);
//!
//! match extractor.extract(42).await? {
//!     Some(path) => println!("written to {}", path.display()),
//!     None => println!("no such blob"),
//! }
//! ```

pub mod blobs;
pub mod connection;
pub mod listener;
pub mod output;
pub mod queue;
pub mod status;

// Test fixtures for integration tests in tests/ of this and downstream crates.
// Built with the `migrations` feature, which is on by default.
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use docferry_core::*;

pub use blobs::PgBlobExtractor;
pub use connection::{redact_url, release, TargetConfig};
pub use listener::PgChangeSource;
pub use output::OutputDirectory;
pub use queue::PgDocumentQueueReader;
pub use status::{ident_for, PgStatusUpdater};

/// Apply the primary schema (queue, candidates, destination, notify trigger).
#[cfg(feature = "migrations")]
pub async fn migrate_primary(primary: &TargetConfig) -> Result<()> {
    let mut migrator = sqlx::migrate!("./migrations/primary");
    // Both schemas may share one database; skip the other migrator's versions.
    migrator.set_ignore_missing(true);
    run_migrator(&migrator, primary).await
}

/// Apply the source schema (BLOB table).
#[cfg(feature = "migrations")]
pub async fn migrate_source(source: &TargetConfig) -> Result<()> {
    let mut migrator = sqlx::migrate!("./migrations/source");
    migrator.set_ignore_missing(true);
    run_migrator(&migrator, source).await
}

#[cfg(feature = "migrations")]
async fn run_migrator(migrator: &sqlx::migrate::Migrator, config: &TargetConfig) -> Result<()> {
    let mut conn = config.connect().await?;
    let result = migrator
        .run(&mut conn)
        .await
        .map_err(|e| Error::Query(sqlx::Error::Migrate(Box::new(e))));
    release(conn, config.target).await;
    result?;
    tracing::info!(
        subsystem = "db",
        component = "migrations",
        db_target = %config.target,
        "Migrations applied"
    );
    Ok(())
}
