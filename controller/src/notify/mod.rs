//! Notification dispatch: on status transitions, invoke every configured
//! sink sequentially, ignoring (but logging) individual sink errors.

mod discord;
mod gotify;

pub use discord::DiscordSink;
pub use gotify::GotifySink;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use uptime_core::store::NotificationSink;

/// Hot-swappable list of sinks. A send uses a snapshot of the list taken
/// under the read lock, so updating the list never blocks an in-flight
/// dispatch.
pub struct NotificationDispatcher {
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sinks: RwLock::new(sinks),
        }
    }

    pub async fn update_sinks(&self, sinks: Vec<Arc<dyn NotificationSink>>) {
        *self.sinks.write().await = sinks;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_status_change(
        &self,
        check_name: &str,
        target: &str,
        is_up: bool,
        status_code: i32,
        response_time_ms: u32,
        error_message: &str,
    ) {
        let snapshot = self.sinks.read().await.clone();
        for sink in snapshot {
            if let Err(e) = sink
                .send_status_change(check_name, target, is_up, status_code, response_time_ms, error_message)
                .await
            {
                warn!(sink = sink.name(), error = %e, "notification sink send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uptime_core::Result;

    struct CountingSink {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send_status_change(
            &self,
            _check_name: &str,
            _target: &str,
            _is_up: bool,
            _status_code: i32,
            _response_time_ms: u32,
            _error_message: &str,
        ) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(uptime_core::Error::Protocol("boom".into()));
            }
            Ok(())
        }

        async fn test_webhook(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_every_sink_and_survives_errors() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::new(vec![
            Arc::new(CountingSink {
                count: Arc::clone(&count),
                fail: true,
            }),
            Arc::new(CountingSink {
                count: Arc::clone(&count),
                fail: false,
            }),
        ]);

        dispatcher
            .send_status_change("api", "http://host/ok", false, 500, 10, "unexpected status code 500")
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_sinks_replaces_list() {
        let dispatcher = NotificationDispatcher::new(vec![]);
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher
            .update_sinks(vec![Arc::new(CountingSink {
                count: Arc::clone(&count),
                fail: false,
            })])
            .await;
        dispatcher
            .send_status_change("api", "http://host/ok", true, 200, 5, "")
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
