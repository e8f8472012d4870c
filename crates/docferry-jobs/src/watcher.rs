//! Change watcher: keeps a one-shot subscription armed and counts fires.
//!
//! The watcher is a single task alternating between two states:
//!
//! - **Armed**: waiting on the current [`Subscription`].
//! - **Firing**: the subscription fired; count it, publish it, and arm a new
//!   one before waiting again.
//!
//! Because one task does both, a fire can never be observed while a re-arm
//! is still outstanding, and there is never more than one live subscription.
//! Fires that arrive during a re-arm are buffered by the source and fire the
//! next subscription.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use docferry_core::{
    defaults, validate_subscription_query, ChangeFeed, ChangeSource, Error, Result, Subscription,
    WatcherEvent,
};
use docferry_db::{PgChangeSource, TargetConfig};

/// Configuration for the change watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Query whose result set is watched.
    pub query: String,
    /// Notification channel raised by the watched table.
    pub channel: String,
    /// Whether the host should start a watcher at all.
    pub enabled: bool,
    /// First re-arm retry delay.
    pub min_delay: Duration,
    /// Upper bound for re-arm retry delays.
    pub max_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            query: defaults::WATCH_QUERY.to_string(),
            channel: defaults::WATCH_CHANNEL.to_string(),
            enabled: true,
            min_delay: Duration::from_millis(defaults::REARM_MIN_DELAY_MS),
            max_delay: Duration::from_millis(defaults::REARM_MAX_DELAY_MS),
        }
    }
}

impl WatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DOCFERRY_WATCH_QUERY` | queue query | Query whose result set is watched |
    /// | `DOCFERRY_WATCH_CHANNEL` | `document_download_queue_changed` | NOTIFY channel |
    /// | `DOCFERRY_WATCH_ENABLED` | `true` | Enable/disable the watcher |
    /// | `DOCFERRY_REARM_MIN_DELAY_MS` | `250` | First retry delay |
    /// | `DOCFERRY_REARM_MAX_DELAY_MS` | `30000` | Retry delay cap |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let query = std::env::var("DOCFERRY_WATCH_QUERY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.query);

        let channel = std::env::var("DOCFERRY_WATCH_CHANNEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.channel);

        let enabled = std::env::var("DOCFERRY_WATCH_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let min_delay = std::env::var("DOCFERRY_REARM_MIN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.min_delay);

        let max_delay = std::env::var("DOCFERRY_REARM_MAX_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay)
            .max(min_delay);

        Self {
            query,
            channel,
            enabled,
            min_delay,
            max_delay,
        }
    }

    /// Watch a different query.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Enable or disable the watcher.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the re-arm retry delay bounds.
    pub fn with_backoff(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    /// Retry policy for re-arming. Never gives up.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_jitter()
            .without_max_times()
    }
}

/// Handle for controlling a running watcher.
///
/// Dropping the handle also stops the watcher, without waiting for it.
pub struct WatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    feed: ChangeFeed,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    /// Get a receiver for watcher events.
    pub fn events(&self) -> broadcast::Receiver<WatcherEvent> {
        self.feed.subscribe()
    }

    /// Changes observed so far.
    pub fn change_count(&self) -> u64 {
        self.feed.change_count()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Tear down the subscription, release the connection, and wait for the
    /// watch task to exit.
    pub async fn stop(self) -> Result<()> {
        // Fails only if the task already exited; joining still applies.
        let _ = self.shutdown_tx.send(()).await;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("watcher task failed: {}", e)))
    }
}

/// Watches one query through a [`ChangeSource`].
pub struct ChangeWatcher<S: ChangeSource + 'static> {
    source: S,
    config: WatcherConfig,
    feed: ChangeFeed,
}

impl ChangeWatcher<PgChangeSource> {
    /// Watcher over a new `LISTEN` connection to `primary`.
    pub async fn connect(primary: &TargetConfig, config: WatcherConfig) -> Result<Self> {
        let source = PgChangeSource::connect(primary, config.channel.clone()).await?;
        Ok(Self::new(source, config))
    }
}

impl<S: ChangeSource + 'static> ChangeWatcher<S> {
    pub fn new(source: S, config: WatcherConfig) -> Self {
        Self {
            source,
            config,
            feed: ChangeFeed::default(),
        }
    }

    /// Publish to an existing feed, e.g. one shared with HTTP handlers.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Arm the first subscription and spawn the watch loop.
    ///
    /// Fails with [`Error::UnsupportedQuery`] for a query that cannot be
    /// watched, or with the first arm's error (e.g. [`Error::Connection`]).
    pub async fn start(mut self) -> Result<WatcherHandle> {
        validate_subscription_query(&self.config.query)?;

        let subscription = self.source.arm(&self.config.query).await.map_err(|e| {
            error!(
                subsystem = "jobs",
                component = "watcher",
                error = %e,
                "Initial arm failed"
            );
            e
        })?;

        self.feed.emit(WatcherEvent::Started);
        self.feed.emit(WatcherEvent::Armed {
            generation: subscription.generation(),
            rearm: false,
            row_count: subscription.row_count(),
        });
        info!(
            subsystem = "jobs",
            component = "watcher",
            channel = %self.config.channel,
            generation = subscription.generation(),
            row_count = subscription.row_count(),
            "Change watcher started"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let feed = self.feed.clone();
        let join = tokio::spawn(run(
            self.source,
            self.config,
            self.feed,
            subscription,
            shutdown_rx,
        ));

        Ok(WatcherHandle {
            shutdown_tx,
            feed,
            join,
        })
    }
}

#[instrument(skip_all, fields(subsystem = "jobs", component = "watcher"))]
async fn run<S: ChangeSource>(
    mut source: S,
    config: WatcherConfig,
    feed: ChangeFeed,
    mut subscription: Subscription,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        let generation = subscription.generation();

        let fired = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("Change watcher received shutdown signal");
                break;
            }
            result = source.fired(subscription) => result,
        };

        match fired {
            Ok(notice) => {
                let count = feed.record_change(notice.generation);
                info!(
                    generation = notice.generation,
                    count,
                    payload = %notice.payload,
                    "Change observed"
                );
            }
            Err(e) if e.is_retryable() => {
                warn!(generation, error = %e, "Subscription lost; re-arming");
            }
            Err(e) => {
                error!(generation, error = %e, "Subscription failed; stopping watcher");
                break;
            }
        }

        match rearm(&mut source, &config, &feed, &mut shutdown_rx).await {
            Some(next) => subscription = next,
            None => break,
        }
    }

    if let Err(e) = source.close().await {
        warn!(error = %e, "Change source did not close cleanly");
    }
    feed.emit(WatcherEvent::Stopped);
    info!("Change watcher stopped");
}

/// Arm a new subscription, retrying transient failures with backoff.
///
/// Returns `None` when shut down or on a failure retrying cannot fix.
async fn rearm<S: ChangeSource>(
    source: &mut S,
    config: &WatcherConfig,
    feed: &ChangeFeed,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Option<Subscription> {
    let mut delays = config.backoff().build();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let armed = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return None,
            result = source.arm(&config.query) => result,
        };

        let e = match armed {
            Ok(subscription) => {
                debug!(
                    generation = subscription.generation(),
                    row_count = subscription.row_count(),
                    attempt,
                    "Subscription re-armed"
                );
                feed.emit(WatcherEvent::Armed {
                    generation: subscription.generation(),
                    rearm: true,
                    row_count: subscription.row_count(),
                });
                return Some(subscription);
            }
            Err(e) if !e.is_retryable() => {
                error!(attempt, error = %e, "Re-arm failed permanently");
                return None;
            }
            Err(e) => e,
        };

        let delay = delays.next().unwrap_or(config.max_delay);
        warn!(
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %e,
            "Re-arm failed; retrying"
        );
        feed.emit(WatcherEvent::RearmFailed {
            attempt,
            retry_in_ms: delay.as_millis() as u64,
            error: e.to_string(),
        });

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use docferry_core::ChangeNotice;

    // ========== FAKE SOURCE ==========

    enum Signal {
        Notify,
        Drop,
    }

    #[derive(Default)]
    struct FakeState {
        arms: u32,
        fail_arms: u32,
        fatal_arm: bool,
        live: bool,
        double_armed: bool,
        closed: bool,
        generation: u64,
    }

    struct FakeSource {
        state: Arc<Mutex<FakeState>>,
        signals: mpsc::UnboundedReceiver<Signal>,
    }

    fn fake() -> (FakeSource, Arc<Mutex<FakeState>>, mpsc::UnboundedSender<Signal>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            FakeSource {
                state: state.clone(),
                signals: rx,
            },
            state,
            tx,
        )
    }

    fn io_error(msg: &str) -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            msg.to_string(),
        ))
    }

    #[async_trait]
    impl ChangeSource for FakeSource {
        async fn arm(&mut self, query: &str) -> Result<Subscription> {
            let mut state = self.state.lock().unwrap();
            if state.fatal_arm {
                return Err(Error::UnsupportedQuery("relation dropped".into()));
            }
            if state.fail_arms > 0 {
                state.fail_arms -= 1;
                return Err(io_error("connection reset"));
            }
            if state.live {
                state.double_armed = true;
            }
            state.live = true;
            state.arms += 1;
            state.generation += 1;
            Ok(Subscription::new(state.generation, query, "test_channel", 0))
        }

        async fn fired(&mut self, subscription: Subscription) -> Result<ChangeNotice> {
            match self.signals.recv().await {
                Some(Signal::Notify) => {
                    self.state.lock().unwrap().live = false;
                    Ok(ChangeNotice {
                        generation: subscription.generation(),
                        channel: subscription.channel().to_string(),
                        payload: "UPDATE".to_string(),
                    })
                }
                Some(Signal::Drop) => {
                    self.state.lock().unwrap().live = false;
                    Err(io_error("connection lost"))
                }
                None => std::future::pending().await,
            }
        }

        async fn close(self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.live = false;
            Ok(())
        }
    }

    fn test_config() -> WatcherConfig {
        WatcherConfig::default()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<WatcherEvent>,
        mut pred: impl FnMut(&WatcherEvent) -> bool,
    ) -> WatcherEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("feed closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event within timeout")
    }

    fn is_rearmed(generation: u64) -> impl FnMut(&WatcherEvent) -> bool {
        move |e| {
            matches!(e, WatcherEvent::Armed { generation: g, rearm: true, .. } if *g == generation)
        }
    }

    // ========== TESTS ==========

    #[tokio::test]
    async fn test_three_fires_count_and_rearm_each_time() {
        let (source, state, signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        for expected in 1..=3u64 {
            signals.send(Signal::Notify).unwrap();
            let event = wait_for(&mut events, |e| matches!(e, WatcherEvent::Changed { .. })).await;
            match event {
                WatcherEvent::Changed { count, .. } => assert_eq!(count, expected),
                other => panic!("unexpected event: {:?}", other),
            }
            wait_for(&mut events, is_rearmed(expected + 1)).await;
        }

        assert_eq!(handle.change_count(), 3);
        // One initial arm plus one re-arm per fire.
        assert_eq!(state.lock().unwrap().arms, 4);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_emits_started_then_armed() {
        let (source, _state, _signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), WatcherEvent::Started);
        assert_eq!(
            events.recv().await.unwrap(),
            WatcherEvent::Armed {
                generation: 1,
                rearm: false,
                row_count: 0
            }
        );
        assert!(handle.is_running());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_query_fails_start_without_arming() {
        let (source, state, _signals) = fake();
        let config = test_config().with_query("SELECT * FROM erp.document_download_queue2");

        let result = ChangeWatcher::new(source, config).start().await;

        assert!(matches!(result, Err(Error::UnsupportedQuery(_))));
        assert_eq!(state.lock().unwrap().arms, 0);
    }

    #[tokio::test]
    async fn test_initial_arm_failure_is_returned() {
        let (source, state, _signals) = fake();
        state.lock().unwrap().fail_arms = 1;

        let result = ChangeWatcher::new(source, test_config()).start().await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_transient_rearm_failures_are_retried() {
        let (source, state, signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        state.lock().unwrap().fail_arms = 2;
        signals.send(Signal::Notify).unwrap();

        for expected in 1..=2u32 {
            let event =
                wait_for(&mut events, |e| matches!(e, WatcherEvent::RearmFailed { .. })).await;
            match event {
                WatcherEvent::RearmFailed { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        wait_for(&mut events, is_rearmed(2)).await;

        assert_eq!(handle.change_count(), 1);
        assert!(handle.is_running());

        // The re-armed subscription still fires.
        signals.send(Signal::Notify).unwrap();
        wait_for(&mut events, is_rearmed(3)).await;
        assert_eq!(handle.change_count(), 2);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_drop_rearms_without_counting() {
        let (source, state, signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        signals.send(Signal::Drop).unwrap();
        wait_for(&mut events, is_rearmed(2)).await;

        assert_eq!(handle.change_count(), 0);
        assert_eq!(state.lock().unwrap().arms, 2);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_permanent_rearm_failure_stops_watcher() {
        let (source, state, signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        state.lock().unwrap().fatal_arm = true;
        signals.send(Signal::Notify).unwrap();
        wait_for(&mut events, |e| *e == WatcherEvent::Stopped).await;

        assert!(state.lock().unwrap().closed);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_source() {
        let (source, state, _signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        handle.stop().await.unwrap();

        let guard = state.lock().unwrap();
        assert!(guard.closed);
        assert!(!guard.live);
        drop(guard);
        wait_for(&mut events, |e| *e == WatcherEvent::Stopped).await;
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_watcher() {
        let (source, state, _signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        drop(handle);
        wait_for(&mut events, |e| *e == WatcherEvent::Stopped).await;
        assert!(state.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_burst_of_fires_never_double_arms() {
        let (source, state, signals) = fake();
        let watcher = ChangeWatcher::new(source, test_config());
        let mut events = watcher.feed().subscribe();
        let handle = watcher.start().await.unwrap();

        for _ in 0..3 {
            signals.send(Signal::Notify).unwrap();
        }
        wait_for(&mut events, is_rearmed(4)).await;

        assert_eq!(handle.change_count(), 3);
        assert!(!state.lock().unwrap().double_armed);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_feed_is_used() {
        let (source, _state, signals) = fake();
        let feed = ChangeFeed::new(16);
        let mut events = feed.subscribe();
        let handle = ChangeWatcher::new(source, test_config())
            .with_feed(feed.clone())
            .start()
            .await
            .unwrap();

        signals.send(Signal::Notify).unwrap();
        wait_for(&mut events, is_rearmed(2)).await;
        assert_eq!(feed.change_count(), 1);
        handle.stop().await.unwrap();
    }

    // ========== CONFIG ==========

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.query, defaults::WATCH_QUERY);
        assert_eq!(config.channel, defaults::WATCH_CHANNEL);
        assert!(config.enabled);
        assert_eq!(config.min_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_watcher_config_builder() {
        let config = WatcherConfig::default()
            .with_query("SELECT a FROM t")
            .with_channel("t_changed")
            .with_enabled(false);
        assert_eq!(config.query, "SELECT a FROM t");
        assert_eq!(config.channel, "t_changed");
        assert!(!config.enabled);
    }

    #[test]
    fn test_with_backoff_keeps_max_above_min() {
        let config = WatcherConfig::default()
            .with_backoff(Duration::from_secs(2), Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_never_runs_out() {
        let config = test_config();
        let delays: Vec<Duration> = config.backoff().build().take(50).collect();
        assert_eq!(delays.len(), 50);
        // Jitter can at most double a capped delay.
        assert!(delays.iter().all(|d| *d <= config.max_delay * 2));
    }
}
