//! Scheduler: one runner task per enabled check, ticking on its interval,
//! applying the retry policy, persisting results, detecting status
//! transitions, and feeding the notification dispatcher and live event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uptime_core::model::{Check, CheckResult, RegionKey};
use uptime_core::probers::{TailscaleControl, TailscaleNet};
use uptime_core::store::Store;

use crate::events::{CheckResultEvent, EventBus, Subscription};
use crate::notify::NotificationDispatcher;
use crate::registry::ProbeRegistry;

struct Runner {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

struct SchedulerInner {
    runners: HashMap<i64, Runner>,
    checks: HashMap<i64, Check>,
    global_cancel_tx: watch::Sender<bool>,
    global_cancel_rx: watch::Receiver<bool>,
}

/// Owns every check's runner task and the per-(check, region) LastStatus
/// cache used for transition detection.
pub struct Scheduler {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationDispatcher>,
    registry: Arc<ProbeRegistry>,
    tailscale_control: Option<Arc<dyn TailscaleControl>>,
    tailscale_net: Option<Arc<dyn TailscaleNet>>,
    last_status: Arc<DashMap<RegionKey, CheckResult>>,
    inner: Arc<RwLock<SchedulerInner>>,
}

impl Scheduler {
    /// `last_status` is shared with the [`crate::registry::ProbeRegistry`]
    /// so remote-probe results and local runner results feed the same
    /// transition-detection cache.
    pub fn new(
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        notifier: Arc<NotificationDispatcher>,
        registry: Arc<ProbeRegistry>,
        last_status: Arc<DashMap<RegionKey, CheckResult>>,
        tailscale_control: Option<Arc<dyn TailscaleControl>>,
        tailscale_net: Option<Arc<dyn TailscaleNet>>,
    ) -> Self {
        let (global_cancel_tx, global_cancel_rx) = watch::channel(false);
        Self {
            store,
            events,
            notifier,
            registry,
            tailscale_control,
            tailscale_net,
            last_status,
            inner: Arc::new(RwLock::new(SchedulerInner {
                runners: HashMap::new(),
                checks: HashMap::new(),
                global_cancel_tx,
                global_cancel_rx,
            })),
        }
    }

    /// Loads every enabled check and starts a runner for each. Calling this
    /// twice is harmless: `spawn_runner` replaces any runner already present.
    pub async fn start(&self) -> uptime_core::Result<()> {
        let checks = self.store.list_enabled_checks().await?;
        info!(count = checks.len(), "scheduler starting runners");
        for check in checks {
            self.spawn_runner(check).await;
        }
        Ok(())
    }

    /// Cancels every runner and waits for them to exit.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.write().await;
            let _ = inner.global_cancel_tx.send(true);
            inner.runners.drain().map(|(_, r)| r.handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Starts a fresh runner for `check` if enabled, shutting down any
    /// predecessor first; removes the runner if disabled.
    pub async fn add_or_replace(&self, check: Check) {
        if check.header.enabled {
            self.spawn_runner(check).await;
        } else {
            self.remove(check.id()).await;
        }
    }

    pub async fn remove(&self, check_id: i64) {
        let runner = self.inner.write().await.runners.remove(&check_id);
        if let Some(runner) = runner {
            let _ = runner.cancel_tx.send(true);
            let _ = runner.handle.await;
        }
        self.inner.write().await.checks.remove(&check_id);
    }

    /// Runs the check once immediately, out of band, sharing the same
    /// ingestion path as the ticker.
    pub async fn trigger(&self, check_id: i64) -> uptime_core::Result<()> {
        let check = {
            let inner = self.inner.read().await;
            inner.checks.get(&check_id).cloned()
        };
        let check = match check {
            Some(c) => c,
            None => self
                .store
                .get_check(check_id)
                .await?
                .ok_or(uptime_core::Error::CheckNotFound(check_id))?,
        };

        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let notifier = Arc::clone(&self.notifier);
        let last_status = Arc::clone(&self.last_status);
        let tailscale_control = self.tailscale_control.clone();
        let tailscale_net = self.tailscale_net.clone();
        tokio::spawn(async move {
            run_once(
                &check,
                &store,
                &events,
                &notifier,
                &last_status,
                tailscale_control.as_deref(),
                tailscale_net.as_deref(),
            )
            .await;
        });
        Ok(())
    }

    /// Dispatches a `CHECK_NOW` command to the probe stream for `region`.
    pub async fn trigger_in_region(&self, check_id: i64, region: &str) -> crate::error::Result<()> {
        let check = self
            .store
            .get_check(check_id)
            .await?
            .ok_or(uptime_core::Error::CheckNotFound(check_id))?;
        self.registry.send_check_now(region, &check).await
    }

    /// Hot-swaps the notification sink list without restarting runners.
    pub async fn update_notifiers(&self, sinks: Vec<Arc<dyn uptime_core::store::NotificationSink>>) {
        self.notifier.update_sinks(sinks).await;
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: crate::events::SubscriberId) {
        self.events.unsubscribe(id);
    }

    async fn spawn_runner(&self, check: Check) {
        let check_id = check.id();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let global_cancel_rx = self.inner.read().await.global_cancel_rx.clone();

        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let notifier = Arc::clone(&self.notifier);
        let last_status = Arc::clone(&self.last_status);
        let tailscale_control = self.tailscale_control.clone();
        let tailscale_net = self.tailscale_net.clone();
        let runner_check = check.clone();

        let handle = tokio::spawn(async move {
            runner_loop(
                runner_check,
                store,
                events,
                notifier,
                last_status,
                tailscale_control,
                tailscale_net,
                cancel_rx,
                global_cancel_rx,
            )
            .await;
        });

        let predecessor = {
            let mut inner = self.inner.write().await;
            inner.checks.insert(check_id, check);
            inner.runners.insert(check_id, Runner { handle, cancel_tx })
        };

        if let Some(predecessor) = predecessor {
            let _ = predecessor.cancel_tx.send(true);
            let _ = predecessor.handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn runner_loop(
    check: Check,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationDispatcher>,
    last_status: Arc<DashMap<RegionKey, CheckResult>>,
    tailscale_control: Option<Arc<dyn TailscaleControl>>,
    tailscale_net: Option<Arc<dyn TailscaleNet>>,
    mut cancel_rx: watch::Receiver<bool>,
    mut global_cancel_rx: watch::Receiver<bool>,
) {
    let check_id = check.id();

    if let Ok(Some(initial)) = store.latest_history(check_id, None).await {
        last_status.insert(RegionKey::local(check_id), initial);
    }

    run_once(
        &check,
        &store,
        &events,
        &notifier,
        &last_status,
        tailscale_control.as_deref(),
        tailscale_net.as_deref(),
    )
    .await;

    let mut ticker = tokio::time::interval(Duration::from_secs(check.header.interval_seconds as u64));
    ticker.tick().await; // first tick fires immediately; already consumed above

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let check = check.clone();
                let store = Arc::clone(&store);
                let events = Arc::clone(&events);
                let notifier = Arc::clone(&notifier);
                let last_status = Arc::clone(&last_status);
                let tailscale_control = tailscale_control.clone();
                let tailscale_net = tailscale_net.clone();
                tokio::spawn(async move {
                    run_once(
                        &check,
                        &store,
                        &events,
                        &notifier,
                        &last_status,
                        tailscale_control.as_deref(),
                        tailscale_net.as_deref(),
                    )
                    .await;
                });
            }
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    break;
                }
            }
            _ = global_cancel_rx.changed() => {
                if *global_cancel_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Retry loop for a single tick: up to `retries + 1` attempts, stopping on
/// first success. Persists only the last attempt's result.
#[allow(clippy::too_many_arguments)]
async fn run_once(
    check: &Check,
    store: &Arc<dyn Store>,
    events: &Arc<EventBus>,
    notifier: &Arc<NotificationDispatcher>,
    last_status: &Arc<DashMap<RegionKey, CheckResult>>,
    tailscale_control: Option<&dyn TailscaleControl>,
    tailscale_net: Option<&dyn TailscaleNet>,
) {
    let max_attempts = check.header.retries as u32 + 1;
    let retry_delay = Duration::from_secs(check.header.retry_delay_seconds as u64);

    let (result, _attempts) = retry_until_success(max_attempts, retry_delay, || {
        uptime_core::probers::run_check(check, tailscale_control, tailscale_net)
    })
    .await;

    ingest_result(
        check.id(),
        &check.header.name,
        &check.target_string(),
        result,
        store,
        events,
        notifier,
        last_status,
    )
    .await;
}

/// Runs `probe` up to `max_attempts` times, sleeping `retry_delay` between
/// attempts, stopping at the first success. Returns the last result and how
/// many attempts were made, so callers (and tests) can assert both the
/// outcome and the attempt count without depending on wall-clock timing.
async fn retry_until_success<F, Fut>(max_attempts: u32, retry_delay: Duration, mut probe: F) -> (CheckResult, u32)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CheckResult>,
{
    let mut attempts = 1;
    let mut result = probe().await;
    while attempts < max_attempts && !result.success {
        tokio::time::sleep(retry_delay).await;
        result = probe().await;
        attempts += 1;
    }
    (result, attempts)
}

/// Shared ingestion path for locally-produced and remote-probe-produced
/// results: persist, detect transition, notify (local only), publish.
pub async fn ingest_result(
    check_id: i64,
    check_name: &str,
    target: &str,
    result: CheckResult,
    store: &Arc<dyn Store>,
    events: &Arc<EventBus>,
    notifier: &Arc<NotificationDispatcher>,
    last_status: &Arc<DashMap<RegionKey, CheckResult>>,
) {
    let is_remote = result.region.is_some();
    let persisted = match store.append_history(&result).await {
        Ok(r) => r,
        Err(e) => {
            warn!(check_id, "failed to persist result: {e}");
            return;
        }
    };

    let key = match &persisted.region {
        Some(region) => RegionKey::remote(check_id, region.clone()),
        None => RegionKey::local(check_id),
    };

    let previous = last_status.get(&key).map(|r| r.clone());
    let transitioned = previous.as_ref().map(|p| p.success != persisted.success).unwrap_or(true);

    if transitioned && !is_remote {
        notifier
            .send_status_change(
                check_name,
                target,
                persisted.success,
                persisted.status_code,
                persisted.response_time_ms,
                &persisted.error_message,
            )
            .await;
    }

    last_status.insert(key, persisted.clone());

    events.publish(CheckResultEvent {
        check_id,
        check_name: check_name.to_string(),
        is_up: persisted.success,
        last_checked_at: persisted.checked_at,
        last_status: persisted,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uptime_core::store::NotificationSink;

    use crate::store::MemoryStore;

    struct CountingSink {
        count: Arc<AtomicUsize>,
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
        ) -> uptime_core::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn test_webhook(&self) -> uptime_core::Result<()> {
            Ok(())
        }
    }

    fn harness() -> (Arc<dyn Store>, Arc<EventBus>, Arc<NotificationDispatcher>, Arc<AtomicUsize>, Arc<DashMap<RegionKey, CheckResult>>)
    {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = Arc::new(NotificationDispatcher::new(vec![Arc::new(CountingSink {
            count: Arc::clone(&count),
        })]));
        (
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new()),
            notifier,
            count,
            Arc::new(DashMap::new()),
        )
    }

    #[tokio::test]
    async fn first_result_counts_as_a_transition_and_notifies() {
        let (store, events, notifier, count, last_status) = harness();
        let mut sub = events.subscribe();

        ingest_result(
            1,
            "api",
            "http://host/ok",
            CheckResult::success(1, 200, 10),
            &store,
            &events,
            &notifier,
            &last_status,
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(last_status.contains_key(&RegionKey::local(1)));
        assert!(sub.rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn repeated_same_status_does_not_renotify() {
        let (store, events, notifier, count, last_status) = harness();

        for _ in 0..3 {
            ingest_result(
                1,
                "api",
                "http://host/ok",
                CheckResult::success(1, 200, 10),
                &store,
                &events,
                &notifier,
                &last_status,
            )
            .await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flip_from_success_to_failure_notifies_again() {
        let (store, events, notifier, count, last_status) = harness();

        ingest_result(1, "api", "t", CheckResult::success(1, 200, 10), &store, &events, &notifier, &last_status).await;
        ingest_result(
            1,
            "api",
            "t",
            CheckResult::failure(1, 0, 10, "timed out"),
            &store,
            &events,
            &notifier,
            &last_status,
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remote_result_skips_notification_but_still_publishes() {
        let (store, events, notifier, count, last_status) = harness();
        let mut sub = events.subscribe();

        let mut result = CheckResult::success(1, 200, 37);
        result.region = Some("eu-west-1".into());
        result.probe_id = Some(9);

        ingest_result(1, "api", "t", result, &store, &events, &notifier, &last_status).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(last_status.contains_key(&RegionKey::remote(1, "eu-west-1")));
        assert!(sub.rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn local_and_remote_transitions_are_tracked_independently() {
        let (store, events, notifier, count, last_status) = harness();

        ingest_result(1, "api", "t", CheckResult::success(1, 200, 10), &store, &events, &notifier, &last_status).await;

        let mut remote = CheckResult::success(1, 200, 10);
        remote.region = Some("eu-west-1".into());
        ingest_result(1, "api", "t", remote, &store, &events, &notifier, &last_status).await;

        // Local notified once (first result); remote never notifies.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(last_status.contains_key(&RegionKey::local(1)));
        assert!(last_status.contains_key(&RegionKey::remote(1, "eu-west-1")));
    }

    #[tokio::test]
    async fn retry_until_success_stops_at_first_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let (result, made) = retry_until_success(3, Duration::from_millis(1), move || {
            let a = Arc::clone(&a);
            async move {
                let n = a.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    CheckResult::failure(1, 0, 1, "not yet")
                } else {
                    CheckResult::success(1, 200, 1)
                }
            }
        })
        .await;

        assert_eq!(made, 3);
        assert!(result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_until_success_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let (result, made) = retry_until_success(2, Duration::from_millis(1), move || {
            let a = Arc::clone(&a);
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                CheckResult::failure(1, 0, 1, "always fails")
            }
        })
        .await;

        assert_eq!(made, 2);
        assert!(!result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    proptest::proptest! {
        /// For any number of configured retries and any attempt index at which
        /// the probe starts succeeding, `retry_until_success` makes exactly
        /// `min(max_attempts, success_at)` attempts and returns success iff
        /// that attempt was reached within the budget.
        #[test]
        fn retry_attempts_are_bounded_and_stop_on_first_success(
            max_attempts in 1u32..6,
            success_at in 1u32..8,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let attempts = Arc::new(AtomicUsize::new(0));
                let a = Arc::clone(&attempts);
                let (result, made) = retry_until_success(max_attempts, Duration::from_millis(0), move || {
                    let a = Arc::clone(&a);
                    async move {
                        let n = a.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                        if n >= success_at {
                            CheckResult::success(1, 200, 0)
                        } else {
                            CheckResult::failure(1, 0, 0, "not yet")
                        }
                    }
                })
                .await;

                let expected_attempts = success_at.min(max_attempts);
                prop_assert_eq!(made, expected_attempts);
                prop_assert_eq!(result.success, success_at <= max_attempts);
            });
        }
    }

    fn idle_tailscale_check(id: i64) -> Check {
        Check {
            header: uptime_core::model::CheckHeader {
                id,
                name: "overlay".into(),
                interval_seconds: 3600,
                timeout_seconds: 1,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: chrono::Utc::now(),
                group_id: None,
                tags: Default::default(),
            },
            kind: uptime_core::model::CheckKind::Tailscale {
                tailscale_device_id: "device-1".into(),
            },
        }
    }

    fn test_scheduler() -> Scheduler {
        let (store, events, notifier, _count, last_status) = harness();
        let registry = Arc::new(crate::registry::ProbeRegistry::new(
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&notifier),
            Arc::clone(&last_status),
        ));
        Scheduler::new(store, events, notifier, registry, last_status, None, None)
    }

    #[tokio::test]
    async fn add_or_replace_then_remove_leaves_no_runner() {
        let scheduler = test_scheduler();
        let check = idle_tailscale_check(1);

        scheduler.add_or_replace(check).await;
        assert!(scheduler.inner.read().await.runners.contains_key(&1));

        scheduler.remove(1).await;
        assert!(!scheduler.inner.read().await.runners.contains_key(&1));
        assert!(!scheduler.inner.read().await.checks.contains_key(&1));
    }

    #[tokio::test]
    async fn add_or_replace_twice_starts_exactly_one_runner() {
        let scheduler = test_scheduler();
        let check = idle_tailscale_check(1);

        scheduler.add_or_replace(check.clone()).await;
        scheduler.add_or_replace(check).await;

        assert_eq!(scheduler.inner.read().await.runners.len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn add_or_replace_with_disabled_check_removes_existing_runner() {
        let scheduler = test_scheduler();
        let mut check = idle_tailscale_check(1);

        scheduler.add_or_replace(check.clone()).await;
        assert!(scheduler.inner.read().await.runners.contains_key(&1));

        check.header.enabled = false;
        scheduler.add_or_replace(check).await;
        assert!(!scheduler.inner.read().await.runners.contains_key(&1));
    }
}
