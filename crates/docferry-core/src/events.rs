//! Watcher events, the process-wide change counter, and the feed that
//! publishes both to hosts.
//!
//! The watcher runs on its own task. Hosts (HTTP handlers, SSE streams, tests)
//! subscribe to the [`ChangeFeed`] instead of being called back on the
//! watcher's task, so nothing the host does can stall notification delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Event published by the change watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// The watch loop is running.
    Started,
    /// A fresh subscription is in place. `rearm` is false for the first one.
    Armed {
        generation: u64,
        rearm: bool,
        row_count: usize,
    },
    /// A subscription fired. `count` is the counter value after increment.
    Changed {
        count: u64,
        generation: u64,
        observed_at: DateTime<Utc>,
    },
    /// Re-arming failed and will be retried after `retry_in_ms`.
    RearmFailed {
        attempt: u32,
        retry_in_ms: u64,
        error: String,
    },
    /// The watch loop exited.
    Stopped,
}

impl WatcherEvent {
    /// Dot-namespaced name used for SSE `event:` lines.
    pub fn event_type(&self) -> &'static str {
        match self {
            WatcherEvent::Started => "watcher.started",
            WatcherEvent::Armed { .. } => "watcher.armed",
            WatcherEvent::Changed { .. } => "watcher.changed",
            WatcherEvent::RearmFailed { .. } => "watcher.rearm_failed",
            WatcherEvent::Stopped => "watcher.stopped",
        }
    }
}

/// Number of change notifications observed since process start.
///
/// Monotonic; cloning shares the same underlying counter.
#[derive(Debug, Clone, Default)]
pub struct ChangeCounter {
    value: Arc<AtomicU64>,
}

impl ChangeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Broadcast feed of watcher events plus the counter they report.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<WatcherEvent>,
    counter: ChangeCounter,
}

impl ChangeFeed {
    /// Create a new feed with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            counter: ChangeCounter::new(),
        }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: WatcherEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            subscriber_count = self.tx.receiver_count(),
            "ChangeFeed emit"
        );
        let _ = self.tx.send(event);
    }

    /// Count one observed change and publish it.
    pub fn record_change(&self, generation: u64) -> u64 {
        let count = self.counter.increment();
        self.emit(WatcherEvent::Changed {
            count,
            generation,
            observed_at: Utc::now(),
        });
        count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.tx.subscribe()
    }

    pub fn counter(&self) -> &ChangeCounter {
        &self.counter
    }

    pub fn change_count(&self) -> u64 {
        self.counter.get()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        assert_eq!(ChangeCounter::new().get(), 0);
    }

    #[test]
    fn test_counter_increment_returns_new_value() {
        let counter = ChangeCounter::new();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_counter_clone_shares_state() {
        let a = ChangeCounter::new();
        let b = a.clone();
        a.increment();
        b.increment();
        assert_eq!(a.get(), 2);
        assert_eq!(b.get(), 2);
    }

    #[tokio::test]
    async fn test_record_change_emits_counter_value() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.subscribe();

        assert_eq!(feed.record_change(1), 1);
        assert_eq!(feed.record_change(2), 2);

        match rx.recv().await.unwrap() {
            WatcherEvent::Changed {
                count, generation, ..
            } => {
                assert_eq!(count, 1);
                assert_eq!(generation, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WatcherEvent::Changed { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(feed.change_count(), 2);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let feed = ChangeFeed::new(4);
        feed.emit(WatcherEvent::Started);
        assert_eq!(feed.record_change(1), 1);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(WatcherEvent::Armed {
            generation: 3,
            rearm: true,
            row_count: 7,
        })
        .unwrap();
        assert_eq!(json["type"], "armed");
        assert_eq!(json["generation"], 3);
        assert_eq!(json["rearm"], true);
    }

    #[test]
    fn test_event_types() {
        assert_eq!(WatcherEvent::Started.event_type(), "watcher.started");
        assert_eq!(WatcherEvent::Stopped.event_type(), "watcher.stopped");
    }
}
