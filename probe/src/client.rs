//! Background task owning the probe's WebSocket connection: connect,
//! register, serve `ServerCommand`s, heartbeat, reconnect on any failure.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uptime_core::model::Check;
use uptime_core::wire::{ControllerMessage, HeartbeatMsg, ProbeMessage, RegisterMsg, ResultMsg};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Fixed reconnect delay on any connection or stream failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Heartbeat cadence once registered.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs until `shutdown` is signalled. Each iteration of the outer loop is
/// one connection attempt; a failure at any stage sleeps
/// [`RECONNECT_DELAY`] and retries rather than returning an error.
pub async fn run(config: &ProbeConfig, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_and_serve(config, &mut shutdown).await {
            Ok(()) => {
                // Clean shutdown requested mid-connection.
                return;
            }
            Err(e) => {
                warn!("connection to {} lost: {e}", config.server);
            }
        }

        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn connect_and_serve(config: &ProbeConfig, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let (stream, _) = tokio_tungstenite::connect_async(&config.server)
        .await
        .map_err(|e| ProbeError::Connect(e.to_string()))?;
    info!(server = %config.server, region = %config.region, "connected");

    let (mut tx, mut rx) = stream.split();

    let register = ProbeMessage::Register(RegisterMsg {
        region_code: config.region.clone(),
        token: config.token.clone(),
    });
    send(&mut tx, &register).await?;

    match tokio::time::timeout(REGISTRATION_TIMEOUT, rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ControllerMessage>(&text) {
            Ok(ControllerMessage::Registered(ack)) => {
                info!(probe_id = ack.probe_id, region = %config.region, "registered");
            }
            Ok(ControllerMessage::ServerError(err)) => {
                return Err(ProbeError::RegistrationRejected(format!("{}: {}", err.code, err.message)));
            }
            Ok(ControllerMessage::ServerCommand(_)) => {
                return Err(ProbeError::RegistrationRejected("unexpected command before ack".into()));
            }
            Err(e) => return Err(ProbeError::Stream(format!("invalid registration ack: {e}"))),
        },
        Ok(Some(Ok(_))) => return Err(ProbeError::Stream("non-text registration ack".into())),
        Ok(Some(Err(e))) => return Err(ProbeError::Stream(e.to_string())),
        Ok(None) => return Err(ProbeError::Stream("stream closed during registration".into())),
        Err(_) => return Err(ProbeError::Stream("registration timed out".into())),
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; skip it, we just connected.

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let hb = ProbeMessage::Heartbeat(HeartbeatMsg { timestamp: chrono::Utc::now().timestamp_millis() });
                if send(&mut tx, &hb).await.is_err() {
                    return Err(ProbeError::Stream("heartbeat send failed".into()));
                }
            }
            frame = rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_frame(&text, config, &mut tx).await {
                            warn!("dropping malformed server frame: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("controller closed connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ProbeError::Stream(e.to_string())),
                    None => return Err(ProbeError::Stream("stream ended".into())),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_frame(text: &str, config: &ProbeConfig, tx: &mut WsSink) -> Result<()> {
    let msg: ControllerMessage =
        serde_json::from_str(text).map_err(|e| ProbeError::Stream(format!("invalid JSON: {e}")))?;

    match msg {
        ControllerMessage::ServerCommand(cmd) => {
            debug!(check_id = cmd.check_id, "executing dispatched check");
            let check: Check = (&cmd).into();
            let result = uptime_core::probers::run_check(&check, None, None).await;
            let outbound = ProbeMessage::Result(ResultMsg::from_result(config.region.clone(), &result));
            send(tx, &outbound).await?;
        }
        ControllerMessage::ServerError(err) => {
            warn!(code = %err.code, "server error: {}", err.message);
        }
        ControllerMessage::Registered(_) => {
            debug!("duplicate registration ack ignored");
        }
    }

    Ok(())
}

async fn send(tx: &mut WsSink, msg: &ProbeMessage) -> Result<()> {
    let json = serde_json::to_string(msg).map_err(|e| ProbeError::Stream(format!("serialize error: {e}")))?;
    tx.send(Message::Text(json.into())).await.map_err(|e| ProbeError::Stream(e.to_string()))
}
