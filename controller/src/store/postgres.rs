//! Postgres-backed `Store` implementation. Uses `sqlx` with runtime-checked
//! (not compile-time-checked) queries so the crate builds without a live
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uptime_core::model::{Check, CheckResult, FlatCheckRow, Probe, ProbeStatus};
use uptime_core::store::{HistoryQuery, Store};
use uptime_core::{Error, Result};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CheckRow {
    id: i64,
    name: String,
    check_type: String,
    interval_seconds: i32,
    timeout_seconds: i32,
    retries: i16,
    retry_delay_seconds: i32,
    enabled: bool,
    created_at: DateTime<Utc>,
    group_id: Option<i64>,
    tags: Vec<String>,

    url: Option<String>,
    http_method: Option<String>,
    expected_status_codes: Option<Vec<i32>>,
    json_path: Option<String>,
    expected_json_value: Option<String>,

    postgres_conn_string: Option<String>,
    postgres_query: Option<String>,
    expected_query_value: Option<String>,

    ping_host: Option<String>,

    dns_hostname: Option<String>,
    dns_record_type: Option<String>,
    expected_dns_value: Option<String>,

    tailscale_device_id: Option<String>,

    tailscale_service_host: Option<String>,
    tailscale_service_port: Option<i32>,
    tailscale_service_protocol: Option<String>,
    tailscale_service_path: Option<String>,
}

impl From<CheckRow> for FlatCheckRow {
    fn from(row: CheckRow) -> Self {
        FlatCheckRow {
            id: row.id,
            name: row.name,
            check_type: row.check_type,
            interval_seconds: row.interval_seconds as u32,
            timeout_seconds: row.timeout_seconds as u32,
            retries: row.retries as u8,
            retry_delay_seconds: row.retry_delay_seconds as u32,
            enabled: row.enabled,
            created_at: row.created_at,
            group_id: row.group_id,
            tags: row.tags,
            url: row.url,
            http_method: row.http_method,
            expected_status_codes: row.expected_status_codes.map(|v| v.into_iter().map(|c| c as u16).collect()),
            json_path: row.json_path,
            expected_json_value: row.expected_json_value,
            postgres_conn_string: row.postgres_conn_string,
            postgres_query: row.postgres_query,
            expected_query_value: row.expected_query_value,
            ping_host: row.ping_host,
            dns_hostname: row.dns_hostname,
            dns_record_type: row.dns_record_type,
            expected_dns_value: row.expected_dns_value,
            tailscale_device_id: row.tailscale_device_id,
            tailscale_service_host: row.tailscale_service_host,
            tailscale_service_port: row.tailscale_service_port.map(|p| p as u16),
            tailscale_service_protocol: row.tailscale_service_protocol,
            tailscale_service_path: row.tailscale_service_path,
        }
    }
}

const SELECT_CHECK_COLUMNS: &str = r#"
    id, name, check_type, interval_seconds, timeout_seconds, retries, retry_delay_seconds,
    enabled, created_at, group_id, tags,
    url, http_method, expected_status_codes, json_path, expected_json_value,
    postgres_conn_string, postgres_query, expected_query_value,
    ping_host,
    dns_hostname, dns_record_type, expected_dns_value,
    tailscale_device_id,
    tailscale_service_host, tailscale_service_port, tailscale_service_protocol, tailscale_service_path
"#;

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    check_id: i64,
    status_code: i32,
    response_time_ms: i32,
    success: bool,
    error_message: String,
    response_body: Option<String>,
    checked_at: DateTime<Utc>,
    probe_id: Option<i64>,
    region: Option<String>,
}

impl From<HistoryRow> for CheckResult {
    fn from(row: HistoryRow) -> Self {
        CheckResult {
            id: Some(row.id),
            check_id: row.check_id,
            status_code: row.status_code,
            response_time_ms: row.response_time_ms as u32,
            success: row.success,
            error_message: row.error_message,
            response_body: row.response_body,
            checked_at: row.checked_at,
            probe_id: row.probe_id,
            region: row.region,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProbeRow {
    id: i64,
    region_code: String,
    ip_address: Option<String>,
    status: String,
    last_seen_at: Option<DateTime<Utc>>,
    token_hash: String,
}

impl From<ProbeRow> for Probe {
    fn from(row: ProbeRow) -> Self {
        Probe {
            id: row.id,
            region_code: row.region_code,
            ip_address: row.ip_address,
            status: if row.status == "ONLINE" {
                ProbeStatus::Online
            } else {
                ProbeStatus::Offline
            },
            last_seen_at: row.last_seen_at,
            token_hash: row.token_hash,
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn list_enabled_checks(&self) -> Result<Vec<Check>> {
        let rows: Vec<CheckRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_CHECK_COLUMNS} FROM checks WHERE enabled = true"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        rows.into_iter()
            .map(|row| Check::try_from(FlatCheckRow::from(row)))
            .collect()
    }

    async fn list_all_checks(&self) -> Result<Vec<Check>> {
        let rows: Vec<CheckRow> = sqlx::query_as(&format!("SELECT {SELECT_CHECK_COLUMNS} FROM checks"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        rows.into_iter()
            .map(|row| Check::try_from(FlatCheckRow::from(row)))
            .collect()
    }

    async fn get_check(&self, check_id: i64) -> Result<Option<Check>> {
        let row: Option<CheckRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_CHECK_COLUMNS} FROM checks WHERE id = $1"
        ))
        .bind(check_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        row.map(|row| Check::try_from(FlatCheckRow::from(row))).transpose()
    }

    async fn append_history(&self, result: &CheckResult) -> Result<CheckResult> {
        let row: HistoryRow = sqlx::query_as(
            r#"
            INSERT INTO check_history
                (check_id, status_code, response_time_ms, success, error_message, response_body, checked_at, probe_id, region)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, check_id, status_code, response_time_ms, success, error_message, response_body, checked_at, probe_id, region
            "#,
        )
        .bind(result.check_id)
        .bind(result.status_code)
        .bind(result.response_time_ms as i32)
        .bind(result.success)
        .bind(&result.error_message)
        .bind(&result.response_body)
        .bind(result.checked_at)
        .bind(result.probe_id)
        .bind(&result.region)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        Ok(row.into())
    }

    async fn latest_history(&self, check_id: i64, region: Option<&str>) -> Result<Option<CheckResult>> {
        let row: Option<HistoryRow> = sqlx::query_as(
            r#"
            SELECT id, check_id, status_code, response_time_ms, success, error_message, response_body, checked_at, probe_id, region
            FROM check_history
            WHERE check_id = $1 AND region IS NOT DISTINCT FROM $2
            ORDER BY checked_at DESC
            LIMIT 1
            "#,
        )
        .bind(check_id)
        .bind(region)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn query_history(&self, query: HistoryQuery) -> Result<Vec<CheckResult>> {
        let limit = query.limit.unwrap_or(500) as i64;
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT id, check_id, status_code, response_time_ms, success, error_message, response_body, checked_at, probe_id, region
            FROM check_history
            WHERE check_id = $1
              AND ($2::text IS NULL OR region = $2)
              AND ($3::timestamptz IS NULL OR checked_at >= $3)
            ORDER BY checked_at ASC
            LIMIT $4
            "#,
        )
        .bind(query.check_id)
        .bind(query.region)
        .bind(query.since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(|(v,)| v))
    }

    async fn validate_probe_token(&self, token: &str) -> Result<Option<i64>> {
        let token_hash = uptime_core::model::hash_token(token);
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM probes WHERE token_hash = $1")
            .bind(&token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(|(id,)| id))
    }

    async fn set_probe_status(&self, probe_id: i64, status: ProbeStatus) -> Result<()> {
        let status_str = match status {
            ProbeStatus::Online => "ONLINE",
            ProbeStatus::Offline => "OFFLINE",
        };
        sqlx::query("UPDATE probes SET status = $2 WHERE id = $1")
            .bind(probe_id)
            .bind(status_str)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn touch_probe_last_seen(&self, probe_id: i64) -> Result<()> {
        sqlx::query("UPDATE probes SET last_seen_at = NOW() WHERE id = $1")
            .bind(probe_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn list_probes(&self) -> Result<Vec<Probe>> {
        let rows: Vec<ProbeRow> = sqlx::query_as("SELECT id, region_code, ip_address, status, last_seen_at, token_hash FROM probes")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
