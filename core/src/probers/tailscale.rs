//! Tailscale device-status prober.
//!
//! No third-party crate talks to the Tailscale control plane directly, so
//! this prober depends only on the [`TailscaleControl`] trait — an injected
//! collaborator, swappable in tests. The shipped implementation calls the
//! Tailscale control API over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Check, CheckKind, CheckResult};

#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub connected_to_control: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TailscaleControl: Send + Sync {
    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, String>;
}

/// Tailscale control API client (`https://api.tailscale.com/api/v2`).
pub struct TailscaleApiControl {
    client: reqwest::Client,
    api_key: String,
    tailnet: String,
}

impl TailscaleApiControl {
    pub fn new(api_key: impl Into<String>, tailnet: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            tailnet: tailnet.into(),
        }
    }
}

#[async_trait]
impl TailscaleControl for TailscaleApiControl {
    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, String> {
        let url = format!(
            "https://api.tailscale.com/api/v2/tailnet/{}/devices/{}",
            self.tailnet, device_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("control API returned {}", resp.status()));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        let connected_to_control = body
            .get("online")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let last_seen = body
            .get("lastSeen")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(DeviceStatus {
            connected_to_control,
            last_seen,
        })
    }
}

/// Reachable iff connected-to-control, or last_seen within the last 5 minutes.
pub(crate) fn is_reachable(status: &DeviceStatus, now: DateTime<Utc>) -> bool {
    if status.connected_to_control {
        return true;
    }
    match status.last_seen {
        Some(last_seen) => now.signed_duration_since(last_seen) <= chrono::Duration::minutes(5),
        None => false,
    }
}

pub async fn probe_tailscale(check: &Check, control: &dyn TailscaleControl, timeout: Duration) -> CheckResult {
    let device_id = match &check.kind {
        CheckKind::Tailscale { tailscale_device_id } => tailscale_device_id,
        _ => unreachable!("probe_tailscale called on non-tailscale check"),
    };

    let start = std::time::Instant::now();
    let outcome = tokio::time::timeout(timeout, control.device_status(device_id)).await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match outcome {
        Ok(Ok(status)) => {
            if is_reachable(&status, Utc::now()) {
                CheckResult::success(check.id(), 200, elapsed_ms)
            } else {
                CheckResult::failure(check.id(), 0, elapsed_ms, "device not connected and last_seen stale")
            }
        }
        Ok(Err(e)) => CheckResult::failure(check.id(), 0, elapsed_ms, e),
        Err(_) => CheckResult::failure(check.id(), 0, elapsed_ms, "control API call timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeControl(DeviceStatus);

    #[async_trait]
    impl TailscaleControl for FakeControl {
        async fn device_status(&self, _device_id: &str) -> Result<DeviceStatus, String> {
            Ok(self.0.clone())
        }
    }

    fn tailscale_check() -> Check {
        Check {
            header: crate::model::CheckHeader {
                id: 1,
                name: "nas".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: Utc::now(),
                group_id: None,
                tags: Default::default(),
            },
            kind: CheckKind::Tailscale {
                tailscale_device_id: "device-123".into(),
            },
        }
    }

    #[tokio::test]
    async fn connected_to_control_is_up() {
        let control = FakeControl(DeviceStatus {
            connected_to_control: true,
            last_seen: None,
        });
        let result = probe_tailscale(&tailscale_check(), &control, Duration::from_secs(1)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn recent_last_seen_is_up() {
        let control = FakeControl(DeviceStatus {
            connected_to_control: false,
            last_seen: Some(Utc::now() - chrono::Duration::minutes(1)),
        });
        let result = probe_tailscale(&tailscale_check(), &control, Duration::from_secs(1)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn stale_last_seen_is_down() {
        let control = FakeControl(DeviceStatus {
            connected_to_control: false,
            last_seen: Some(Utc::now() - chrono::Duration::minutes(10)),
        });
        let result = probe_tailscale(&tailscale_check(), &control, Duration::from_secs(1)).await;
        assert!(!result.success);
    }
}
