//! Change notification over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! A trigger on the watched table raises `pg_notify(<channel>, ...)` whenever
//! its rows change. Arming a subscription re-executes the watched query on
//! the listener's own connection and makes sure the channel is listened to;
//! waiting on the subscription consumes it.
//!
//! # Delivery Guarantees
//!
//! - The channel stays registered between subscriptions, so notifications
//!   raised while a subscription is being re-armed are buffered and fire the
//!   next one instead of being missed.
//! - Notifications may be lost when the connection drops. A drop or reset is
//!   reported as a connection error so the caller re-arms; that arm opens a
//!   new connection, issues LISTEN again, and re-reads the query.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tracing::{debug, info, trace, warn};

use docferry_core::{
    defaults, validate_subscription_query, ChangeNotice, ChangeSource, Error, Result,
    Subscription, Target,
};

use crate::connection::TargetConfig;
use crate::queue::parse_queue_row;

/// [`ChangeSource`] backed by a dedicated [`PgListener`] connection.
pub struct PgChangeSource {
    primary: TargetConfig,
    listener: PgListener,
    channel: String,
    listening: bool,
    /// Set after a transport failure; the next arm opens a new connection.
    broken: bool,
    generation: u64,
}

impl PgChangeSource {
    /// Connect the notification connection for `primary`.
    pub async fn connect(primary: &TargetConfig, channel: impl Into<String>) -> Result<Self> {
        let channel = channel.into();
        if channel.trim().is_empty() {
            return Err(Error::Config("notification channel is empty".to_string()));
        }

        let listener = open_listener(primary).await?;
        debug!(
            subsystem = "db",
            component = "listener",
            op = "connect",
            channel = %channel,
            url = %primary.redacted_url(),
            "Notification connection established"
        );

        Ok(Self {
            primary: primary.clone(),
            listener,
            channel,
            listening: false,
            broken: false,
            generation: 0,
        })
    }

    /// Connect using the default channel name.
    pub async fn connect_default(primary: &TargetConfig) -> Result<Self> {
        Self::connect(primary, defaults::WATCH_CHANNEL).await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Replace a connection that failed at the transport level.
    ///
    /// `PgListener` only reconnects by itself for some I/O errors and keeps
    /// the dead socket for others (e.g. a reset), so the whole listener is
    /// dropped and LISTEN is issued again on the new one.
    async fn reconnect(&mut self) -> Result<()> {
        self.listener = open_listener(&self.primary).await?;
        self.listening = false;
        self.broken = false;
        info!(
            subsystem = "db",
            component = "listener",
            op = "reconnect",
            channel = %self.channel,
            "Notification connection re-established"
        );
        Ok(())
    }

    /// Record a failure; transport faults force a reconnect on the next arm.
    fn note_failure(&mut self, e: Error) -> Error {
        if e.is_retryable() {
            self.broken = true;
        }
        e
    }

    async fn ensure_listening(&mut self) -> Result<()> {
        if self.listening {
            return Ok(());
        }
        self.listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::connection(Target::Primary, e))?;
        self.listening = true;
        debug!(channel = %self.channel, "LISTEN issued");
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn arm(&mut self, query: &str) -> Result<Subscription> {
        validate_subscription_query(query)?;

        if self.broken {
            self.reconnect().await?;
        }

        // Listen first: a change landing between the read and the LISTEN
        // would otherwise go unnoticed.
        if let Err(e) = self.ensure_listening().await {
            return Err(self.note_failure(e));
        }

        let rows = match sqlx::query(query).fetch_all(&mut self.listener).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.note_failure(Error::Query(e))),
        };

        for row in &rows {
            match parse_queue_row(row) {
                Ok(queue_row) => trace!(?queue_row, "queue row"),
                Err(e) => {
                    trace!(error = %e, "queue row not decodable; counted only");
                    break;
                }
            }
        }

        self.generation += 1;
        Ok(Subscription::new(
            self.generation,
            query,
            self.channel.clone(),
            rows.len(),
        ))
    }

    async fn fired(&mut self, subscription: Subscription) -> Result<ChangeNotice> {
        loop {
            match self.listener.try_recv().await {
                Ok(Some(notification)) if notification.channel() == subscription.channel() => {
                    return Ok(ChangeNotice {
                        generation: subscription.generation(),
                        channel: notification.channel().to_string(),
                        payload: notification.payload().to_string(),
                    });
                }
                Ok(Some(notification)) => {
                    trace!(channel = notification.channel(), "Ignoring foreign channel");
                }
                Ok(None) => {
                    warn!(
                        subsystem = "db",
                        component = "listener",
                        generation = subscription.generation(),
                        "Notification connection lost"
                    );
                    return Err(self.note_failure(Error::connection(
                        Target::Primary,
                        sqlx::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionAborted,
                            "notification connection lost",
                        )),
                    )));
                }
                Err(e) => {
                    warn!(
                        subsystem = "db",
                        component = "listener",
                        generation = subscription.generation(),
                        error = %e,
                        "Notification connection failed"
                    );
                    return Err(self.note_failure(Error::connection(Target::Primary, e)));
                }
            }
        }
    }

    async fn close(self) -> Result<()> {
        let mut listener = self.listener;
        if self.listening && !self.broken {
            listener
                .unlisten_all()
                .await
                .map_err(|e| Error::connection(Target::Primary, e))?;
        }
        debug!(channel = %self.channel, "Notification connection closed");
        Ok(())
    }
}

async fn open_listener(primary: &TargetConfig) -> Result<PgListener> {
    let start = Instant::now();
    let listener = match tokio::time::timeout(
        primary.connect_timeout,
        PgListener::connect(&primary.url),
    )
    .await
    {
        Ok(Ok(listener)) => listener,
        Ok(Err(e)) => return Err(Error::connection(primary.target, e)),
        Err(_) => {
            return Err(Error::connection(
                primary.target,
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "listener connect timed out",
                )),
            ))
        }
    };
    trace!(
        duration_ms = start.elapsed().as_millis() as u64,
        "Listener connected"
    );
    Ok(listener)
}
