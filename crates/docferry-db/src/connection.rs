//! Connection targets and scoped connection management.
//!
//! Every pipeline operation opens its own connection and closes it when done;
//! nothing is pooled or shared across operations. The change watcher holds
//! its own long-lived listener connection (see [`crate::listener`]).

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::{debug, warn};

use docferry_core::{defaults, Error, Result, Target};

/// Application name reported to PostgreSQL (`pg_stat_activity`).
pub const APPLICATION_NAME: &str = "docferry";

/// Endpoint, credentials and timeout for one database.
#[derive(Clone)]
pub struct TargetConfig {
    /// Which database this is.
    pub target: Target,
    /// Connection URL including credentials.
    pub url: String,
    /// Maximum time to wait for a connection to be established.
    pub connect_timeout: Duration,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("target", &self.target)
            .field("url", &redact_url(&self.url))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TargetConfig {
    pub fn new(target: Target, url: impl Into<String>) -> Self {
        Self {
            target,
            url: url.into(),
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
        }
    }

    /// The primary database (queue, candidates, destination).
    pub fn primary(url: impl Into<String>) -> Self {
        Self::new(Target::Primary, url)
    }

    /// The source database (BLOB table).
    pub fn source(url: impl Into<String>) -> Self {
        Self::new(Target::Source, url)
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PRIMARY_DATABASE_URL` (falls back to `DATABASE_URL`) | `postgres://localhost/erp` |
    /// | `SOURCE_DATABASE_URL` | `postgres://localhost/blobs` |
    /// | `PRIMARY_CONNECT_TIMEOUT_SECS` / `SOURCE_CONNECT_TIMEOUT_SECS` | `30` |
    pub fn from_env(target: Target) -> Self {
        let (url, timeout_var) = match target {
            Target::Primary => (
                std::env::var("PRIMARY_DATABASE_URL")
                    .or_else(|_| std::env::var("DATABASE_URL"))
                    .unwrap_or_else(|_| defaults::PRIMARY_DATABASE_URL.to_string()),
                "PRIMARY_CONNECT_TIMEOUT_SECS",
            ),
            Target::Source => (
                std::env::var("SOURCE_DATABASE_URL")
                    .unwrap_or_else(|_| defaults::SOURCE_DATABASE_URL.to_string()),
                "SOURCE_CONNECT_TIMEOUT_SECS",
            ),
        };

        let timeout_secs = std::env::var(timeout_var)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::CONNECT_TIMEOUT_SECS)
            .max(1);

        Self::new(target, url).with_connect_timeout(Duration::from_secs(timeout_secs))
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }

    /// Parse the URL into connect options.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&self.url).map_err(|e| {
            Error::Config(format!(
                "invalid {} database URL {}: {}",
                self.target,
                self.redacted_url(),
                e
            ))
        })?;
        Ok(options.application_name(APPLICATION_NAME))
    }

    /// Open a fresh connection, bounded by `connect_timeout`.
    pub async fn connect(&self) -> Result<PgConnection> {
        let options = self.connect_options()?;
        let start = Instant::now();

        let conn = match tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(
                    subsystem = "db",
                    component = "connection",
                    db_target = %self.target,
                    error = %e,
                    "Connection failed"
                );
                return Err(Error::connection(self.target, e));
            }
            Err(_) => {
                warn!(
                    subsystem = "db",
                    component = "connection",
                    db_target = %self.target,
                    timeout_secs = self.connect_timeout.as_secs(),
                    "Connection timed out"
                );
                return Err(Error::connection(self.target, timed_out(self.connect_timeout)));
            }
        };

        debug!(
            subsystem = "db",
            component = "connection",
            op = "connect",
            db_target = %self.target,
            duration_ms = start.elapsed().as_millis() as u64,
            "Connection established"
        );
        Ok(conn)
    }
}

/// Close a scoped connection, logging instead of failing.
///
/// The work on the connection is already done when this runs; a failed
/// `Terminate` message only means the server will notice the drop itself.
pub async fn release(conn: PgConnection, target: Target) {
    if let Err(e) = conn.close().await {
        debug!(
            subsystem = "db",
            component = "connection",
            db_target = %target,
            error = %e,
            "Connection close failed"
        );
    }
}

fn timed_out(after: Duration) -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("connect timed out after {}s", after.as_secs()),
    ))
}

/// Mask the password component of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    match authority.rfind('@') {
        Some(at) => {
            let userinfo = &authority[..at];
            match userinfo.find(':') {
                Some(colon) => format!(
                    "{}{}:****{}",
                    &url[..scheme_end + 3],
                    &userinfo[..colon],
                    &rest[at..]
                ),
                None => url.to_string(),
            }
        }
        None => url.to_string(),
    }
}
