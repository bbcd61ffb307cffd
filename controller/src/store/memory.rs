//! In-memory `Store` implementation. Useful for local development and for
//! tests that exercise the scheduler or protocol server without Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uptime_core::model::{Check, CheckResult, Probe, ProbeStatus};
use uptime_core::store::{HistoryQuery, Store};
use uptime_core::{Error, Result};

#[derive(Default)]
struct Inner {
    checks: HashMap<i64, Check>,
    history: Vec<CheckResult>,
    next_result_id: i64,
    settings: HashMap<String, String>,
    probes: HashMap<i64, Probe>,
    next_probe_id: i64,
}

pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub async fn insert_check(&self, check: Check) {
        self.inner.write().await.checks.insert(check.id(), check);
    }

    pub async fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().await.settings.insert(key.into(), value.into());
    }

    /// Registers a probe with a pre-hashed token, returning its id.
    pub async fn register_probe(&self, region_code: impl Into<String>, token_hash: impl Into<String>) -> i64 {
        let mut inner = self.inner.write().await;
        let id = inner.next_probe_id;
        inner.next_probe_id += 1;
        inner.probes.insert(
            id,
            Probe {
                id,
                region_code: region_code.into(),
                ip_address: None,
                status: ProbeStatus::Offline,
                last_seen_at: None,
                token_hash: token_hash.into(),
            },
        );
        id
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_enabled_checks(&self) -> Result<Vec<Check>> {
        Ok(self
            .inner
            .read()
            .await
            .checks
            .values()
            .filter(|c| c.header.enabled)
            .cloned()
            .collect())
    }

    async fn list_all_checks(&self) -> Result<Vec<Check>> {
        Ok(self.inner.read().await.checks.values().cloned().collect())
    }

    async fn get_check(&self, check_id: i64) -> Result<Option<Check>> {
        Ok(self.inner.read().await.checks.get(&check_id).cloned())
    }

    async fn append_history(&self, result: &CheckResult) -> Result<CheckResult> {
        let mut inner = self.inner.write().await;
        let id = inner.next_result_id;
        inner.next_result_id += 1;
        let mut stored = result.clone();
        stored.id = Some(id);
        inner.history.push(stored.clone());
        Ok(stored)
    }

    async fn latest_history(&self, check_id: i64, region: Option<&str>) -> Result<Option<CheckResult>> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .filter(|r| r.check_id == check_id && r.region.as_deref() == region)
            .max_by_key(|r| r.checked_at)
            .cloned())
    }

    async fn query_history(&self, query: HistoryQuery) -> Result<Vec<CheckResult>> {
        let inner = self.inner.read().await;
        let mut results: Vec<CheckResult> = inner
            .history
            .iter()
            .filter(|r| r.check_id == query.check_id)
            .filter(|r| query.region.is_none() || r.region == query.region)
            .filter(|r| query.since.map(|since| r.checked_at >= since).unwrap_or(true))
            .cloned()
            .collect();
        results.sort_by_key(|r| r.checked_at);
        if let Some(limit) = query.limit {
            results.truncate(limit as usize);
        }
        Ok(results)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.settings.get(key).cloned())
    }

    async fn validate_probe_token(&self, token: &str) -> Result<Option<i64>> {
        let token_hash = uptime_core::model::hash_token(token);
        let inner = self.inner.read().await;
        Ok(inner
            .probes
            .values()
            .find(|p| p.token_hash == token_hash)
            .map(|p| p.id))
    }

    async fn set_probe_status(&self, probe_id: i64, status: ProbeStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let probe = inner
            .probes
            .get_mut(&probe_id)
            .ok_or_else(|| Error::ProbeNotFound(probe_id.to_string()))?;
        probe.status = status;
        Ok(())
    }

    async fn touch_probe_last_seen(&self, probe_id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let probe = inner
            .probes
            .get_mut(&probe_id)
            .ok_or_else(|| Error::ProbeNotFound(probe_id.to_string()))?;
        probe.last_seen_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn list_probes(&self) -> Result<Vec<Probe>> {
        Ok(self.inner.read().await.probes.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::model::{CheckHeader, CheckKind};

    fn sample_check(id: i64) -> Check {
        Check {
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

    #[tokio::test]
    async fn append_history_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.append_history(&CheckResult::success(1, 200, 10)).await.unwrap();
        let b = store.append_history(&CheckResult::success(1, 200, 10)).await.unwrap();
        assert!(b.id.unwrap() > a.id.unwrap());
    }

    #[tokio::test]
    async fn latest_history_picks_most_recent() {
        let store = MemoryStore::new();
        let mut older = CheckResult::success(1, 200, 10);
        older.checked_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        store.append_history(&older).await.unwrap();
        let newer = store.append_history(&CheckResult::success(1, 200, 10)).await.unwrap();

        let latest = store.latest_history(1, None).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn validate_probe_token_matches_hash() {
        let store = MemoryStore::new();
        let hash = uptime_core::model::hash_token("secret");
        let probe_id = store.register_probe("eu-west-1", hash).await;

        assert_eq!(store.validate_probe_token("secret").await.unwrap(), Some(probe_id));
        assert_eq!(store.validate_probe_token("wrong").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_enabled_checks_filters_disabled() {
        let store = MemoryStore::new();
        let mut disabled = sample_check(2);
        disabled.header.enabled = false;
        store.insert_check(sample_check(1)).await;
        store.insert_check(disabled).await;

        let enabled = store.list_enabled_checks().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id(), 1);
    }
}
