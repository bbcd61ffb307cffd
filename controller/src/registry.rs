//! Probe registry and WebSocket protocol server.
//!
//! Accepts one long-lived WebSocket stream per probe. Per-stream flow:
//! 1. Accept upgrade.
//! 2. Wait for `Register{region_code, token}`; validate against the store.
//! 3. Mark the probe ONLINE, store the stream in the region map (replacing
//!    any prior stream for that region), ack with `Registered`.
//! 4. Message loop: `Result` is ingested via the shared pipeline (no
//!    notification dispatch); `Heartbeat` updates last_seen_at.
//! 5. On stream end: remove from the region map, mark OFFLINE.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uptime_core::model::{Check, ProbeStatus, RegionKey};
use uptime_core::store::Store;
use uptime_core::wire::{ControllerMessage, ProbeMessage, RegisteredMsg, ServerCommand, ServerErrorMsg};

use crate::error::{ControllerError, Result};
use crate::events::EventBus;
use crate::notify::NotificationDispatcher;
use crate::scheduler::ingest_result;

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

struct ProbeHandle {
    probe_id: i64,
    sender: Sender,
}

/// Region → active-stream map, plus everything the protocol server needs to
/// feed remote results into the same ingestion path as the local scheduler.
pub struct ProbeRegistry {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    notifier: Arc<NotificationDispatcher>,
    last_status: Arc<DashMap<RegionKey, uptime_core::model::CheckResult>>,
    streams: DashMap<String, ProbeHandle>,
}

impl ProbeRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        notifier: Arc<NotificationDispatcher>,
        last_status: Arc<DashMap<RegionKey, uptime_core::model::CheckResult>>,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            last_status,
            streams: DashMap::new(),
        }
    }

    /// Sends `CHECK_NOW` to the stream registered for `region`.
    pub async fn send_check_now(&self, region: &str, check: &Check) -> Result<()> {
        let handle = self
            .streams
            .get(region)
            .map(|h| (h.probe_id, Arc::clone(&h.sender)))
            .ok_or_else(|| ControllerError::NoProbeForRegion(region.to_string()))?;

        let (probe_id, sender) = handle;
        let command = ControllerMessage::ServerCommand(ServerCommand::from_check(check));
        if send_msg(&sender, &command).await.is_err() {
            self.streams.remove(region);
            let _ = self.store.set_probe_status(probe_id, ProbeStatus::Offline).await;
            return Err(ControllerError::Protocol(format!("failed to dispatch to region {region}")));
        }
        Ok(())
    }

    /// Sends `CHECK_NOW` to every registered region.
    pub async fn broadcast_check_now(&self, check: &Check) {
        let regions: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        for region in regions {
            if let Err(e) = self.send_check_now(&region, check).await {
                warn!(region, "broadcast CHECK_NOW failed: {e}");
            }
        }
    }

    pub fn connected_regions(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<Arc<ProbeRegistry>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<ProbeRegistry>) {
    let (sender, mut receiver) = socket.split();
    let sender: Sender = Arc::new(Mutex::new(sender));

    let (probe_id, region) = match wait_for_registration(&mut receiver, &sender, &registry).await {
        Ok(info) => info,
        Err(e) => {
            warn!("probe registration failed: {e}");
            let _ = send_error(&sender, "unauthenticated", &e.to_string()).await;
            return;
        }
    };

    info!(probe_id, region = %region, "probe registered, entering message loop");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_probe_message(&text, probe_id, &region, &registry).await {
                    warn!(probe_id, "probe message error: {e}");
                    let _ = send_error(&sender, "message_error", &e.to_string()).await;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) => {}
            Ok(_) => {}
            Err(e) => {
                warn!(probe_id, "ws recv error: {e}");
                break;
            }
        }
    }

    // Only remove (and mark OFFLINE) if this connection's own stream is
    // still the one registered for `region` — a reconnect may have already
    // replaced it while this connection was draining toward teardown.
    let still_current = registry
        .streams
        .remove_if(&region, |_, h| h.probe_id == probe_id && Arc::ptr_eq(&h.sender, &sender))
        .is_some();

    if still_current {
        let _ = registry.store.set_probe_status(probe_id, ProbeStatus::Offline).await;
        info!(probe_id, region = %region, "probe stream ended, marked OFFLINE");
    } else {
        info!(probe_id, region = %region, "probe stream ended, superseded by a newer connection");
    }
}

async fn wait_for_registration(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    sender: &Sender,
    registry: &Arc<ProbeRegistry>,
) -> Result<(i64, String)> {
    let msg = tokio::time::timeout(Duration::from_secs(30), receiver.next())
        .await
        .map_err(|_| ControllerError::Protocol("registration timeout".into()))?
        .ok_or_else(|| ControllerError::Protocol("connection closed before registration".into()))?
        .map_err(|e| ControllerError::Protocol(format!("ws error: {e}")))?;

    let text = match msg {
        Message::Text(t) => t,
        _ => return Err(ControllerError::Protocol("expected text frame for registration".into())),
    };

    let probe_msg: ProbeMessage =
        serde_json::from_str(&text).map_err(|e| ControllerError::Protocol(format!("invalid JSON: {e}")))?;

    let register = match probe_msg {
        ProbeMessage::Register(r) => r,
        _ => return Err(ControllerError::Protocol("first message must be register".into())),
    };

    let probe_id = registry
        .store
        .validate_probe_token(&register.token)
        .await?
        .ok_or_else(|| ControllerError::Protocol("invalid token".into()))?;

    registry.store.set_probe_status(probe_id, ProbeStatus::Online).await?;

    registry.streams.insert(
        register.region_code.clone(),
        ProbeHandle {
            probe_id,
            sender: Arc::clone(sender),
        },
    );

    let ack = ControllerMessage::Registered(RegisteredMsg { probe_id });
    send_msg(sender, &ack).await?;

    Ok((probe_id, register.region_code))
}

async fn handle_probe_message(text: &str, probe_id: i64, region: &str, registry: &Arc<ProbeRegistry>) -> Result<()> {
    let probe_msg: ProbeMessage =
        serde_json::from_str(text).map_err(|e| ControllerError::Protocol(format!("invalid JSON: {e}")))?;

    match probe_msg {
        ProbeMessage::Result(result) => {
            let check_result = uptime_core::model::CheckResult {
                id: None,
                check_id: result.check_id,
                status_code: result.status_code,
                response_time_ms: result.latency_ms,
                success: result.success,
                error_message: result.error_message,
                response_body: result.response_body,
                checked_at: chrono::Utc::now(),
                probe_id: Some(probe_id),
                region: Some(region.to_string()),
            };

            let check_name = registry
                .store
                .get_check(result.check_id)
                .await?
                .map(|c| c.header.name)
                .unwrap_or_else(|| format!("check-{}", result.check_id));

            ingest_result(
                result.check_id,
                &check_name,
                region,
                check_result,
                &registry.store,
                &registry.events,
                &registry.notifier,
                &registry.last_status,
            )
            .await;
            Ok(())
        }
        ProbeMessage::Heartbeat(_) => {
            registry.store.touch_probe_last_seen(probe_id).await?;
            Ok(())
        }
        ProbeMessage::Register(_) => Err(ControllerError::Protocol("duplicate registration".into())),
    }
}

async fn send_msg(sender: &Sender, msg: &ControllerMessage) -> Result<()> {
    let json = serde_json::to_string(msg).map_err(|e| ControllerError::Protocol(format!("serialize error: {e}")))?;
    let mut guard = sender.lock().await;
    guard
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ControllerError::Protocol(format!("send error: {e}")))?;
    Ok(())
}

async fn send_error(sender: &Sender, code: &str, message: &str) -> Result<()> {
    let msg = ControllerMessage::ServerError(ServerErrorMsg {
        code: code.into(),
        message: message.into(),
    });
    send_msg(sender, &msg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::model::{CheckHeader, CheckKind, CheckResult};
    use uptime_core::wire::ResultMsg;

    use crate::notify::NotificationDispatcher;
    use crate::store::MemoryStore;

    fn sample_check(id: i64) -> uptime_core::model::Check {
        uptime_core::model::Check {
            header: CheckHeader {
                id,
                name: "api".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: chrono::Utc::now(),
                group_id: None,
                tags: Default::default(),
            },
            kind: CheckKind::Http {
                url: "http://host/ok".into(),
                method: Default::default(),
                expected_status_codes: [200].into_iter().collect(),
            },
        }
    }

    fn registry() -> Arc<ProbeRegistry> {
        Arc::new(ProbeRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new()),
            Arc::new(NotificationDispatcher::new(vec![])),
            Arc::new(DashMap::new()),
        ))
    }

    #[tokio::test]
    async fn send_check_now_without_a_connected_probe_errors() {
        let registry = registry();
        let check = sample_check(1);
        let err = registry.send_check_now("eu-west-1", &check).await.unwrap_err();
        assert!(matches!(err, ControllerError::NoProbeForRegion(region) if region == "eu-west-1"));
    }

    #[tokio::test]
    async fn broadcast_with_no_probes_connected_is_a_no_op() {
        let registry = registry();
        registry.broadcast_check_now(&sample_check(1)).await;
        assert!(registry.connected_regions().is_empty());
    }

    #[tokio::test]
    async fn result_message_is_ingested_and_published_without_notification() {
        let registry = registry();
        let mut sub = registry.events.subscribe();

        let result = ResultMsg {
            check_id: 42,
            region: "eu-west-1".into(),
            latency_ms: 37,
            success: true,
            status_code: 200,
            error_message: String::new(),
            response_body: None,
        };
        let text = serde_json::to_string(&ProbeMessage::Result(result)).unwrap();

        handle_probe_message(&text, 9, "eu-west-1", &registry).await.unwrap();

        let event = sub.rx.try_recv().expect("result should publish a live event");
        assert_eq!(event.check_id, 42);
        assert!(registry.last_status.contains_key(&RegionKey::remote(42, "eu-west-1")));
    }

    #[tokio::test]
    async fn heartbeat_touches_probe_last_seen() {
        let store = Arc::new(MemoryStore::new());
        let probe_id = store.register_probe("eu-west-1", uptime_core::model::hash_token("secret")).await;
        store.set_probe_status(probe_id, ProbeStatus::Online).await.unwrap();

        let registry = Arc::new(ProbeRegistry::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(EventBus::new()),
            Arc::new(NotificationDispatcher::new(vec![])),
            Arc::new(DashMap::new()),
        ));

        let text = serde_json::to_string(&ProbeMessage::Heartbeat(uptime_core::wire::HeartbeatMsg {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }))
        .unwrap();

        handle_probe_message(&text, probe_id, "eu-west-1", &registry).await.unwrap();

        let probe = store.list_probes().await.unwrap().into_iter().find(|p| p.id == probe_id).unwrap();
        assert!(probe.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = registry();
        let text = serde_json::to_string(&ProbeMessage::Register(uptime_core::wire::RegisterMsg {
            region_code: "eu-west-1".into(),
            token: "x".into(),
        }))
        .unwrap();

        let err = handle_probe_message(&text, 1, "eu-west-1", &registry).await.unwrap_err();
        assert!(matches!(err, ControllerError::Protocol(_)));
    }

    #[test]
    fn unwrapped_check_result_is_well_formed() {
        assert!(CheckResult::success(1, 200, 10).is_well_formed());
    }

    #[tokio::test]
    async fn result_before_registration_is_rejected_with_no_store_writes() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ProbeRegistry::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(EventBus::new()),
            Arc::new(NotificationDispatcher::new(vec![])),
            Arc::new(DashMap::new()),
        ));

        let app = axum::Router::new().route("/ws", axum::routing::get(ws_handler)).with_state(registry);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("ws://{addr}/ws");
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let result = ResultMsg {
            check_id: 1,
            region: "eu-west-1".into(),
            latency_ms: 5,
            success: true,
            status_code: 200,
            error_message: String::new(),
            response_body: None,
        };
        let text = serde_json::to_string(&ProbeMessage::Result(result)).unwrap();

        use futures::SinkExt as _;
        ws.send(tokio_tungstenite::tungstenite::Message::Text(text.into())).await.unwrap();

        use futures::StreamExt as _;
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.expect("stream should close promptly");
        assert!(
            matches!(next, Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) | None),
            "connection should terminate without ever completing registration"
        );

        assert!(store.list_probes().await.unwrap().is_empty());
    }
}
