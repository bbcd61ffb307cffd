//! Check, result, and probe data model.
//!
//! The in-memory representation is a tagged union: [`CheckHeader`] carries
//! the fields meaningful to every check regardless of type, [`CheckKind`]
//! carries exactly the fields meaningful to one `CheckType`. [`FlatCheckRow`]
//! is the backward-compatible flat shape a relational store exchanges with
//! the core; the two are bridged by fallible conversions below.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discriminant for [`CheckKind`], also used on the wire and in the flat
/// store row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Http,
    JsonHttp,
    Ping,
    Postgres,
    Dns,
    Tailscale,
    TailscaleService,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::JsonHttp => "json_http",
            Self::Ping => "ping",
            Self::Postgres => "postgres",
            Self::Dns => "dns",
            Self::Tailscale => "tailscale",
            Self::TailscaleService => "tailscale_service",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Head,
    Put,
    Delete,
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Get
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
}

impl Default for DnsRecordType {
    fn default() -> Self {
        Self::A
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailscaleServiceProtocol {
    Http,
    Https,
    Tcp,
}

/// Fields common to every check, regardless of type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckHeader {
    pub id: i64,
    pub name: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u8,
    pub retry_delay_seconds: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub group_id: Option<i64>,
    pub tags: BTreeSet<String>,
}

impl CheckHeader {
    /// Clamp retries to at most 10 and retry delay to 1-60 seconds.
    pub fn clamp_retry_policy(&mut self) {
        self.retries = self.retries.min(10);
        self.retry_delay_seconds = self.retry_delay_seconds.clamp(1, 60);
    }
}

/// Type-discriminated check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    Http {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        expected_status_codes: BTreeSet<u16>,
    },
    JsonHttp {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        expected_status_codes: BTreeSet<u16>,
        json_path: Option<String>,
        expected_json_value: Option<String>,
    },
    Ping {
        host: String,
    },
    Dns {
        dns_hostname: String,
        #[serde(default)]
        dns_record_type: DnsRecordType,
        expected_dns_value: Option<String>,
    },
    Postgres {
        postgres_conn_string: String,
        postgres_query: Option<String>,
        expected_query_value: Option<String>,
    },
    Tailscale {
        tailscale_device_id: String,
    },
    TailscaleService {
        host: String,
        port: u16,
        protocol: TailscaleServiceProtocol,
        #[serde(default)]
        path: Option<String>,
    },
}

impl CheckKind {
    pub fn check_type(&self) -> CheckType {
        match self {
            Self::Http { .. } => CheckType::Http,
            Self::JsonHttp { .. } => CheckType::JsonHttp,
            Self::Ping { .. } => CheckType::Ping,
            Self::Dns { .. } => CheckType::Dns,
            Self::Postgres { .. } => CheckType::Postgres,
            Self::Tailscale { .. } => CheckType::Tailscale,
            Self::TailscaleService { .. } => CheckType::TailscaleService,
        }
    }

    /// Target description used by the notification dispatcher.
    pub fn target_string(&self, name: &str) -> String {
        match self {
            Self::Http { url, .. } | Self::JsonHttp { url, .. } => url.clone(),
            Self::Ping { host } => host.clone(),
            Self::Dns { dns_hostname, .. } => dns_hostname.clone(),
            Self::Postgres { .. } => format!("PostgreSQL: {name}"),
            Self::Tailscale { tailscale_device_id } => format!("Tailscale: {tailscale_device_id}"),
            Self::TailscaleService { host, port, .. } => {
                format!("Tailscale Service: {host}:{port}")
            }
        }
    }
}

/// A full check: header plus type-discriminated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    #[serde(flatten)]
    pub header: CheckHeader,
    #[serde(flatten)]
    pub kind: CheckKind,
}

impl Check {
    pub fn id(&self) -> i64 {
        self.header.id
    }

    pub fn target_string(&self) -> String {
        self.kind.target_string(&self.header.name)
    }
}

/// Flat row a relational store persists. All type-specific columns are
/// present; only the ones relevant to `check_type` are semantically
/// meaningful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatCheckRow {
    pub id: i64,
    pub name: String,
    pub check_type: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub retries: u8,
    pub retry_delay_seconds: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub group_id: Option<i64>,
    pub tags: Vec<String>,

    pub url: Option<String>,
    pub http_method: Option<String>,
    pub expected_status_codes: Option<Vec<u16>>,
    pub json_path: Option<String>,
    pub expected_json_value: Option<String>,

    pub postgres_conn_string: Option<String>,
    pub postgres_query: Option<String>,
    pub expected_query_value: Option<String>,

    pub ping_host: Option<String>,

    pub dns_hostname: Option<String>,
    pub dns_record_type: Option<String>,
    pub expected_dns_value: Option<String>,

    pub tailscale_device_id: Option<String>,

    pub tailscale_service_host: Option<String>,
    pub tailscale_service_port: Option<u16>,
    pub tailscale_service_protocol: Option<String>,
    pub tailscale_service_path: Option<String>,
}

impl From<&Check> for FlatCheckRow {
    fn from(check: &Check) -> Self {
        let mut row = FlatCheckRow {
            id: check.header.id,
            name: check.header.name.clone(),
            check_type: check.kind.check_type().as_str().to_string(),
            interval_seconds: check.header.interval_seconds,
            timeout_seconds: check.header.timeout_seconds,
            retries: check.header.retries,
            retry_delay_seconds: check.header.retry_delay_seconds,
            enabled: check.header.enabled,
            created_at: check.header.created_at,
            group_id: check.header.group_id,
            tags: check.header.tags.iter().cloned().collect(),
            ..Default::default()
        };

        match &check.kind {
            CheckKind::Http {
                url,
                method,
                expected_status_codes,
            } => {
                row.url = Some(url.clone());
                row.http_method = Some(method.as_str().to_string());
                row.expected_status_codes = Some(expected_status_codes.iter().copied().collect());
            }
            CheckKind::JsonHttp {
                url,
                method,
                expected_status_codes,
                json_path,
                expected_json_value,
            } => {
                row.url = Some(url.clone());
                row.http_method = Some(method.as_str().to_string());
                row.expected_status_codes = Some(expected_status_codes.iter().copied().collect());
                row.json_path = json_path.clone();
                row.expected_json_value = expected_json_value.clone();
            }
            CheckKind::Ping { host } => {
                row.ping_host = Some(host.clone());
            }
            CheckKind::Dns {
                dns_hostname,
                dns_record_type,
                expected_dns_value,
            } => {
                row.dns_hostname = Some(dns_hostname.clone());
                row.dns_record_type = Some(format!("{:?}", dns_record_type).to_uppercase());
                row.expected_dns_value = expected_dns_value.clone();
            }
            CheckKind::Postgres {
                postgres_conn_string,
                postgres_query,
                expected_query_value,
            } => {
                row.postgres_conn_string = Some(postgres_conn_string.clone());
                row.postgres_query = postgres_query.clone();
                row.expected_query_value = expected_query_value.clone();
            }
            CheckKind::Tailscale { tailscale_device_id } => {
                row.tailscale_device_id = Some(tailscale_device_id.clone());
            }
            CheckKind::TailscaleService {
                host,
                port,
                protocol,
                path,
            } => {
                row.tailscale_service_host = Some(host.clone());
                row.tailscale_service_port = Some(*port);
                row.tailscale_service_protocol = Some(
                    match protocol {
                        TailscaleServiceProtocol::Http => "http",
                        TailscaleServiceProtocol::Https => "https",
                        TailscaleServiceProtocol::Tcp => "tcp",
                    }
                    .to_string(),
                );
                row.tailscale_service_path = path.clone();
            }
        }

        row
    }
}

impl TryFrom<FlatCheckRow> for Check {
    type Error = Error;

    fn try_from(row: FlatCheckRow) -> Result<Self> {
        let header = CheckHeader {
            id: row.id,
            name: row.name.clone(),
            interval_seconds: row.interval_seconds.max(10),
            timeout_seconds: row.timeout_seconds.max(1),
            retries: row.retries.min(10),
            retry_delay_seconds: row.retry_delay_seconds.clamp(1, 60),
            enabled: row.enabled,
            created_at: row.created_at,
            group_id: row.group_id,
            tags: row.tags.into_iter().collect(),
        };

        let default_codes = || -> BTreeSet<u16> {
            let mut s = BTreeSet::new();
            s.insert(200);
            s
        };

        let kind = match row.check_type.as_str() {
            "http" => CheckKind::Http {
                url: row.url.unwrap_or_default(),
                method: parse_method(row.http_method.as_deref()),
                expected_status_codes: row
                    .expected_status_codes
                    .filter(|c| !c.is_empty())
                    .map(|c| c.into_iter().collect())
                    .unwrap_or_else(default_codes),
            },
            "json_http" => CheckKind::JsonHttp {
                url: row.url.unwrap_or_default(),
                method: parse_method(row.http_method.as_deref()),
                expected_status_codes: row
                    .expected_status_codes
                    .filter(|c| !c.is_empty())
                    .map(|c| c.into_iter().collect())
                    .unwrap_or_else(default_codes),
                json_path: row.json_path,
                expected_json_value: row.expected_json_value,
            },
            "ping" => CheckKind::Ping {
                host: row.ping_host.unwrap_or_default(),
            },
            "dns" => CheckKind::Dns {
                dns_hostname: row.dns_hostname.unwrap_or_default(),
                dns_record_type: parse_record_type(row.dns_record_type.as_deref()),
                expected_dns_value: row.expected_dns_value,
            },
            "postgres" => CheckKind::Postgres {
                postgres_conn_string: row.postgres_conn_string.unwrap_or_default(),
                postgres_query: row.postgres_query,
                expected_query_value: row.expected_query_value,
            },
            "tailscale" => CheckKind::Tailscale {
                tailscale_device_id: row.tailscale_device_id.unwrap_or_default(),
            },
            "tailscale_service" => CheckKind::TailscaleService {
                host: row.tailscale_service_host.unwrap_or_default(),
                port: row.tailscale_service_port.unwrap_or(0),
                protocol: parse_ts_protocol(row.tailscale_service_protocol.as_deref()),
                path: row.tailscale_service_path,
            },
            other => return Err(Error::UnsupportedCheckType(other.to_string())),
        };

        Ok(Check { header, kind })
    }
}

fn parse_method(s: Option<&str>) -> HttpMethod {
    match s.map(str::to_uppercase).as_deref() {
        Some("POST") => HttpMethod::Post,
        Some("HEAD") => HttpMethod::Head,
        Some("PUT") => HttpMethod::Put,
        Some("DELETE") => HttpMethod::Delete,
        _ => HttpMethod::Get,
    }
}

fn parse_record_type(s: Option<&str>) -> DnsRecordType {
    match s.map(str::to_uppercase).as_deref() {
        Some("AAAA") => DnsRecordType::Aaaa,
        Some("CNAME") => DnsRecordType::Cname,
        Some("MX") => DnsRecordType::Mx,
        Some("TXT") => DnsRecordType::Txt,
        _ => DnsRecordType::A,
    }
}

fn parse_ts_protocol(s: Option<&str>) -> TailscaleServiceProtocol {
    match s.map(str::to_lowercase).as_deref() {
        Some("https") => TailscaleServiceProtocol::Https,
        Some("tcp") => TailscaleServiceProtocol::Tcp,
        _ => TailscaleServiceProtocol::Http,
    }
}

/// One timestamped execution outcome. `region == None` means the result
/// was produced locally by the controller's own scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: Option<i64>,
    pub check_id: i64,
    pub status_code: i32,
    pub response_time_ms: u32,
    pub success: bool,
    pub error_message: String,
    pub response_body: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub probe_id: Option<i64>,
    pub region: Option<String>,
}

impl CheckResult {
    pub fn success(check_id: i64, status_code: i32, response_time_ms: u32) -> Self {
        Self {
            id: None,
            check_id,
            status_code,
            response_time_ms,
            success: true,
            error_message: String::new(),
            response_body: None,
            checked_at: Utc::now(),
            probe_id: None,
            region: None,
        }
    }

    pub fn failure(check_id: i64, status_code: i32, response_time_ms: u32, error_message: impl Into<String>) -> Self {
        Self {
            id: None,
            check_id,
            status_code,
            response_time_ms,
            success: false,
            error_message: error_message.into(),
            response_body: None,
            checked_at: Utc::now(),
            probe_id: None,
            region: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// Validates the `success ⇔ error_message == ""` invariant.
    pub fn is_well_formed(&self) -> bool {
        self.success == self.error_message.is_empty()
    }
}

/// Remote probe executor registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub id: i64,
    pub region_code: String,
    pub ip_address: Option<String>,
    pub status: ProbeStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub token_hash: String,
}

/// SHA-256 hex digest of a presented probe token. Plaintext tokens are
/// never persisted.
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key under which the scheduler's LastStatus cache and the probe
/// registry's region map both index per-(check, region) state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionKey {
    pub check_id: i64,
    pub region: String,
}

impl RegionKey {
    pub fn local(check_id: i64) -> Self {
        Self {
            check_id,
            region: String::new(),
        }
    }

    pub fn remote(check_id: i64, region: impl Into<String>) -> Self {
        Self {
            check_id,
            region: region.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.region.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_http_check() -> Check {
        Check {
            header: CheckHeader {
                id: 1,
                name: "api".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: Utc::now(),
                group_id: None,
                tags: BTreeSet::new(),
            },
            kind: CheckKind::Http {
                url: "http://host/ok".into(),
                method: HttpMethod::Get,
                expected_status_codes: [200].into_iter().collect(),
            },
        }
    }

    #[test]
    fn flat_round_trip_preserves_http_fields() {
        let check = sample_http_check();
        let flat = FlatCheckRow::from(&check);
        let restored = Check::try_from(flat).unwrap();
        assert_eq!(restored.header.id, check.header.id);
        match restored.kind {
            CheckKind::Http { url, .. } => assert_eq!(url, "http://host/ok"),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn result_invariant_holds() {
        let ok = CheckResult::success(1, 200, 10);
        assert!(ok.is_well_formed());
        let bad = CheckResult::failure(1, 500, 10, "boom");
        assert!(bad.is_well_formed());
    }

    #[test]
    fn unknown_check_type_rejected() {
        let row = FlatCheckRow {
            check_type: "carrier_pigeon".into(),
            ..Default::default()
        };
        assert!(Check::try_from(row).is_err());
    }

    #[test]
    fn clamp_retry_policy_enforces_bounds() {
        let mut header = sample_http_check().header;
        header.retries = 200;
        header.retry_delay_seconds = 0;
        header.clamp_retry_policy();
        assert_eq!(header.retries, 10);
        assert_eq!(header.retry_delay_seconds, 1);
    }

    #[test]
    fn region_key_local_vs_remote() {
        let local = RegionKey::local(1);
        assert!(local.is_local());
        let remote = RegionKey::remote(1, "eu-west-1");
        assert!(!remote.is_local());
    }
}
