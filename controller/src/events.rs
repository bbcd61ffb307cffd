//! Live event bus: in-process, buffered, non-blocking fan-out of result
//! events to any number of subscribers (SSE connections).
//!
//! `tokio::sync::broadcast` is the wrong primitive here: a lagging receiver
//! gets a `Lagged` error and loses messages, but the channel itself stays
//! healthy only until the slowest receiver is dropped entirely on repeated
//! lag, which would disconnect a subscriber outright. Subscribers here must
//! never be disconnected by the bus — only individual events may be
//! dropped. So the bus is built from one bounded publisher channel drained
//! by a broadcaster task that `try_send`s to each subscriber's own bounded
//! channel, silently dropping on `Full`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uptime_core::model::CheckResult;

const PUBLISHER_CAPACITY: usize = 100;
const SUBSCRIBER_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResultEvent {
    pub check_id: i64,
    pub check_name: String,
    pub last_status: CheckResult,
    pub is_up: bool,
    pub last_checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Handle for a live-event subscriber. Dropping it does not unsubscribe;
/// call [`EventBus::unsubscribe`] explicitly so the bus can close the
/// channel exactly once.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<CheckResultEvent>,
}

pub struct EventBus {
    publish_tx: mpsc::Sender<CheckResultEvent>,
    subscribers: Arc<DashMap<SubscriberId, mpsc::Sender<CheckResultEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISHER_CAPACITY);
        let subscribers: Arc<DashMap<SubscriberId, mpsc::Sender<CheckResultEvent>>> =
            Arc::new(DashMap::new());

        spawn_broadcaster(publish_rx, Arc::clone(&subscribers));

        Self {
            publish_tx,
            subscribers,
            next_id: AtomicU64::new(1),
        }
    }

    /// Non-blocking publish. If the publisher channel is full, the event is
    /// dropped — liveness over completeness, since the UI polls
    /// authoritative state anyway.
    pub fn publish(&self, event: CheckResultEvent) {
        if self.publish_tx.try_send(event).is_err() {
            debug!("live event bus publisher channel full, dropping event");
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.insert(id, tx);
        Subscription { id, rx }
    }

    /// Removes the subscriber. Dropping the channel's sender closes it for
    /// the receiving side exactly once.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_broadcaster(
    mut publish_rx: mpsc::Receiver<CheckResultEvent>,
    subscribers: Arc<DashMap<SubscriberId, mpsc::Sender<CheckResultEvent>>>,
) {
    tokio::spawn(async move {
        while let Some(event) = publish_rx.recv().await {
            for entry in subscribers.iter() {
                if entry.value().try_send(event.clone()).is_err() {
                    debug!(subscriber = ?entry.key(), "subscriber channel full, dropping event");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::model::CheckResult;

    fn sample_event(check_id: i64) -> CheckResultEvent {
        CheckResultEvent {
            check_id,
            check_name: "api".into(),
            last_status: CheckResult::success(check_id, 200, 10),
            is_up: true,
            last_checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(sample_event(1));
        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.check_id, 1);
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_and_drops_count() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(sub.id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_events_but_is_never_disconnected() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        for i in 0..500 {
            bus.publish(sample_event(i));
        }
        // Give the broadcaster a chance to drain the publisher queue.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut received = 0;
        while sub.rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0);
        assert!(received <= SUBSCRIBER_CAPACITY + PUBLISHER_CAPACITY);
    }
}
