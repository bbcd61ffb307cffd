//! Tailscale-service (HTTP/TCP-over-overlay) prober. Depends on the
//! [`TailscaleNet`] injected collaborator rather than a concrete userspace
//! network stack crate; a real `tsnet`-backed implementation can be
//! swapped in later without touching this module.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::http::status_ok;
use crate::model::{Check, CheckKind, CheckResult, TailscaleServiceProtocol};

/// A process-wide network endpoint dialing into the Tailscale overlay.
/// See [`LazyTailscaleNet`] for a lazily-initialized, process-wide handle.
#[async_trait]
pub trait TailscaleNet: Send + Sync {
    async fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String>;
}

/// Default implementation: dials the overlay the same way it would dial any
/// other TCP endpoint. Swappable for a real userspace Tailscale stack.
pub struct DirectTcpNet;

#[async_trait]
impl TailscaleNet for DirectTcpNet {
    async fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String> {
        tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| "connection timed out".to_string())?
            .map_err(|e| e.to_string())
    }
}

/// Created exactly once for the process lifetime.
pub struct LazyTailscaleNet {
    inner: tokio::sync::OnceCell<DirectTcpNet>,
}

impl Default for LazyTailscaleNet {
    fn default() -> Self {
        Self {
            inner: tokio::sync::OnceCell::new(),
        }
    }
}

impl LazyTailscaleNet {
    pub async fn get(&self) -> &DirectTcpNet {
        self.inner.get_or_init(|| async { DirectTcpNet }).await
    }
}

#[async_trait]
impl TailscaleNet for LazyTailscaleNet {
    async fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String> {
        self.get().await.dial_tcp(host, port, timeout).await
    }
}

pub async fn probe_tailscale_service(check: &Check, net: &dyn TailscaleNet, timeout: Duration) -> CheckResult {
    let (host, port, protocol, path) = match &check.kind {
        CheckKind::TailscaleService {
            host,
            port,
            protocol,
            path,
        } => (host, *port, *protocol, path),
        _ => unreachable!("probe_tailscale_service called on non-tailscale_service check"),
    };

    let start = std::time::Instant::now();

    match protocol {
        TailscaleServiceProtocol::Tcp => {
            let outcome = net.dial_tcp(host, port, timeout).await;
            let elapsed_ms = start.elapsed().as_millis() as u32;
            match outcome {
                Ok(_) => CheckResult::success(check.id(), 200, elapsed_ms),
                Err(e) => CheckResult::failure(check.id(), 0, elapsed_ms, e),
            }
        }
        TailscaleServiceProtocol::Http | TailscaleServiceProtocol::Https => {
            let request_path = path.as_deref().unwrap_or("/");
            let outcome = http_over_overlay(net, host, port, request_path, timeout).await;
            let elapsed_ms = start.elapsed().as_millis() as u32;
            match outcome {
                Ok(code) => {
                    let codes: std::collections::BTreeSet<u16> = std::iter::empty().collect();
                    if status_ok(code, &codes) {
                        CheckResult::success(check.id(), code as i32, elapsed_ms)
                    } else {
                        CheckResult::failure(check.id(), code as i32, elapsed_ms, format!("unexpected status code {code}"))
                    }
                }
                Err(e) => CheckResult::failure(check.id(), 0, elapsed_ms, e),
            }
        }
    }
}

/// Minimal HTTP/1.1 GET over a dialed overlay connection, applying the http
/// prober's status-code semantics. Deliberately hand-rolled rather than
/// layering `reqwest` here, since the connection must go through
/// [`TailscaleNet::dial_tcp`] rather than a normal resolver.
async fn http_over_overlay(
    net: &dyn TailscaleNet,
    host: &str,
    port: u16,
    path: &str,
    timeout: Duration,
) -> Result<u16, String> {
    let mut stream = net.dial_tcp(host, port, timeout).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");

    tokio::time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| "write timed out".to_string())?
        .map_err(|e| e.to_string())?;

    let mut buf = Vec::new();
    tokio::time::timeout(timeout, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| "read timed out".to_string())?
        .map_err(|e| e.to_string())?;

    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().ok_or("empty response")?;
    let code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| format!("malformed status line: {status_line}"))?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    struct LoopbackNet;

    #[async_trait]
    impl TailscaleNet for LoopbackNet {
        async fn dial_tcp(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String> {
            tokio::time::timeout(timeout, TcpStream::connect((host, port)))
                .await
                .map_err(|_| "timeout".to_string())?
                .map_err(|e| e.to_string())
        }
    }

    fn tcp_check(host: String, port: u16) -> Check {
        Check {
            header: crate::model::CheckHeader {
                id: 1,
                name: "svc".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: chrono::Utc::now(),
                group_id: None,
                tags: Default::default(),
            },
            kind: CheckKind::TailscaleService {
                host,
                port,
                protocol: TailscaleServiceProtocol::Tcp,
                path: None,
            },
        }
    }

    #[tokio::test]
    async fn tcp_connect_succeeds_when_listener_present() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let check = tcp_check("127.0.0.1".into(), addr.port());
        let result = probe_tailscale_service(&check, &LoopbackNet, Duration::from_secs(1)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn tcp_connect_fails_when_nothing_listening() {
        let check = tcp_check("127.0.0.1".into(), 1);
        let result = probe_tailscale_service(&check, &LoopbackNet, Duration::from_millis(200)).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn http_over_overlay_reads_status_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });

        let check = Check {
            header: crate::model::CheckHeader {
                id: 2,
                name: "svc-http".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: chrono::Utc::now(),
                group_id: None,
                tags: Default::default(),
            },
            kind: CheckKind::TailscaleService {
                host: "127.0.0.1".into(),
                port: addr.port(),
                protocol: TailscaleServiceProtocol::Http,
                path: Some("/".into()),
            },
        };

        let result = probe_tailscale_service(&check, &LoopbackNet, Duration::from_secs(1)).await;
        assert!(result.success);
        assert_eq!(result.status_code, 200);
    }
}
