//! Collaborator interfaces the core depends on but does not implement:
//! the relational store and notification sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Check, CheckResult, Probe};

/// Time-bounded slice of history for a check.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub check_id: i64,
    pub region: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Everything the core needs from the relational store. The store's own
/// CRUD surface for groups/tags/settings/users/sessions/API-keys/WebAuthn
/// credentials lives in the controller, not here; only the operations the
/// core itself calls are represented.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_enabled_checks(&self) -> Result<Vec<Check>>;
    async fn list_all_checks(&self) -> Result<Vec<Check>>;
    async fn get_check(&self, check_id: i64) -> Result<Option<Check>>;

    async fn append_history(&self, result: &CheckResult) -> Result<CheckResult>;
    async fn latest_history(&self, check_id: i64, region: Option<&str>) -> Result<Option<CheckResult>>;
    async fn query_history(&self, query: HistoryQuery) -> Result<Vec<CheckResult>>;

    /// Settings the core reads: `tailscale_api_key`, `tailscale_tailnet`,
    /// `discord_webhook_url`, `gotify_server_url`, `gotify_token`.
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Returns the probe id on a token match, `None` otherwise.
    async fn validate_probe_token(&self, token: &str) -> Result<Option<i64>>;
    async fn set_probe_status(&self, probe_id: i64, status: crate::model::ProbeStatus) -> Result<()>;
    async fn touch_probe_last_seen(&self, probe_id: i64) -> Result<()>;
    async fn list_probes(&self) -> Result<Vec<Probe>>;
}

/// Notification sink contract. Implementations must be safe for concurrent
/// use; the dispatcher does not serialize beyond invocation order.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Human-readable sink name, used in logs.
    fn name(&self) -> &str;

    async fn send_status_change(
        &self,
        check_name: &str,
        target: &str,
        is_up: bool,
        status_code: i32,
        response_time_ms: u32,
        error_message: &str,
    ) -> Result<()>;

    async fn test_webhook(&self) -> Result<()>;
}
