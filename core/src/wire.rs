//! Bidirectional probe wire protocol.
//!
//! Tagged unions for `ClientMessage`/`ServerMessage`-style framing: a `type`
//! field picks the variant, `serde(rename_all = "snake_case")`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{Check, CheckHeader, CheckKind, CheckType, DnsRecordType, HttpMethod, TailscaleServiceProtocol};

/// Messages a probe sends to the controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeMessage {
    Register(RegisterMsg),
    Result(ResultMsg),
    Heartbeat(HeartbeatMsg),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterMsg {
    pub region_code: String,
    pub token: String,
}

/// `latency_ms` is a non-negative 32-bit integer; `status_code` mirrors
/// HTTP semantics, 200 by convention for non-HTTP successes, 0 on
/// transport failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMsg {
    pub check_id: i64,
    pub region: String,
    pub latency_ms: u32,
    pub success: bool,
    pub status_code: i32,
    pub error_message: String,
    #[serde(default)]
    pub response_body: Option<String>,
}

impl ResultMsg {
    pub fn from_result(region: impl Into<String>, result: &crate::model::CheckResult) -> Self {
        Self {
            check_id: result.check_id,
            region: region.into(),
            latency_ms: result.response_time_ms,
            success: result.success,
            status_code: result.status_code,
            error_message: result.error_message.clone(),
            response_body: result.response_body.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatMsg {
    pub timestamp: i64,
}

/// Messages the controller sends to a probe.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    ServerCommand(ServerCommand),
    Registered(RegisteredMsg),
    ServerError(ServerErrorMsg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    CheckNow,
}

/// The union of fields a prober may need, populated from the check being
/// dispatched. Only the fields relevant to `check_type` are set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerCommand {
    pub command_type: CommandType,
    pub check_id: i64,
    pub check_type: CheckType,

    pub url: Option<String>,
    pub method: Option<String>,
    pub expected_status_codes: Option<Vec<u16>>,

    pub host: Option<String>,

    pub postgres_conn_string: Option<String>,
    pub postgres_query: Option<String>,
    pub expected_query_value: Option<String>,

    pub dns_hostname: Option<String>,
    pub dns_record_type: Option<String>,
    pub expected_dns_value: Option<String>,

    pub json_path: Option<String>,
    pub expected_json_value: Option<String>,

    pub tailscale_device_id: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub path: Option<String>,

    pub timeout_seconds: u32,
}

impl ServerCommand {
    /// Builds a command from a check. `timeout_seconds` defaults to 10 when
    /// the check carries `0` (every in-memory `Check` normally carries a
    /// real timeout; the fallback only matters for a hand-built `0`).
    pub fn from_check(check: &crate::model::Check) -> Self {
        use crate::model::CheckKind::*;

        let mut cmd = ServerCommand {
            command_type: CommandType::CheckNow,
            check_id: check.header.id,
            check_type: check.kind.check_type(),
            url: None,
            method: None,
            expected_status_codes: None,
            host: None,
            postgres_conn_string: None,
            postgres_query: None,
            expected_query_value: None,
            dns_hostname: None,
            dns_record_type: None,
            expected_dns_value: None,
            json_path: None,
            expected_json_value: None,
            tailscale_device_id: None,
            port: None,
            protocol: None,
            path: None,
            timeout_seconds: if check.header.timeout_seconds == 0 {
                10
            } else {
                check.header.timeout_seconds
            },
        };

        match &check.kind {
            Http {
                url,
                method,
                expected_status_codes,
            } => {
                cmd.url = Some(url.clone());
                cmd.method = Some(method.as_str().to_string());
                cmd.expected_status_codes = Some(expected_status_codes.iter().copied().collect());
            }
            JsonHttp {
                url,
                method,
                expected_status_codes,
                json_path,
                expected_json_value,
            } => {
                cmd.url = Some(url.clone());
                cmd.method = Some(method.as_str().to_string());
                cmd.expected_status_codes = Some(expected_status_codes.iter().copied().collect());
                cmd.json_path = json_path.clone();
                cmd.expected_json_value = expected_json_value.clone();
            }
            Ping { host } => cmd.host = Some(host.clone()),
            Dns {
                dns_hostname,
                dns_record_type,
                expected_dns_value,
            } => {
                cmd.dns_hostname = Some(dns_hostname.clone());
                cmd.dns_record_type = Some(format!("{:?}", dns_record_type).to_uppercase());
                cmd.expected_dns_value = expected_dns_value.clone();
            }
            Postgres {
                postgres_conn_string,
                postgres_query,
                expected_query_value,
            } => {
                cmd.postgres_conn_string = Some(postgres_conn_string.clone());
                cmd.postgres_query = postgres_query.clone();
                cmd.expected_query_value = expected_query_value.clone();
            }
            Tailscale { tailscale_device_id } => {
                cmd.tailscale_device_id = Some(tailscale_device_id.clone());
            }
            TailscaleService {
                host,
                port,
                protocol,
                path,
            } => {
                cmd.host = Some(host.clone());
                cmd.port = Some(*port);
                cmd.protocol = Some(
                    match protocol {
                        crate::model::TailscaleServiceProtocol::Http => "http",
                        crate::model::TailscaleServiceProtocol::Https => "https",
                        crate::model::TailscaleServiceProtocol::Tcp => "tcp",
                    }
                    .to_string(),
                );
                cmd.path = path.clone();
            }
        }

        cmd
    }
}

/// Rebuilds a runnable [`Check`] from a dispatched command. The header
/// carries only what a prober consults (`id`, `timeout_seconds`); fields
/// meaningless off the controller (schedule, retries, tags) take inert
/// defaults.
impl From<&ServerCommand> for Check {
    fn from(cmd: &ServerCommand) -> Self {
        let header = CheckHeader {
            id: cmd.check_id,
            name: String::new(),
            interval_seconds: 60,
            timeout_seconds: cmd.timeout_seconds,
            retries: 0,
            retry_delay_seconds: 1,
            enabled: true,
            created_at: chrono::Utc::now(),
            group_id: None,
            tags: BTreeSet::new(),
        };

        let method = match cmd.method.as_deref().map(str::to_uppercase).as_deref() {
            Some("POST") => HttpMethod::Post,
            Some("HEAD") => HttpMethod::Head,
            Some("PUT") => HttpMethod::Put,
            Some("DELETE") => HttpMethod::Delete,
            _ => HttpMethod::Get,
        };

        let kind = match cmd.check_type {
            CheckType::Http => CheckKind::Http {
                url: cmd.url.clone().unwrap_or_default(),
                method,
                expected_status_codes: cmd.expected_status_codes.clone().unwrap_or_default().into_iter().collect(),
            },
            CheckType::JsonHttp => CheckKind::JsonHttp {
                url: cmd.url.clone().unwrap_or_default(),
                method,
                expected_status_codes: cmd.expected_status_codes.clone().unwrap_or_default().into_iter().collect(),
                json_path: cmd.json_path.clone(),
                expected_json_value: cmd.expected_json_value.clone(),
            },
            CheckType::Ping => CheckKind::Ping {
                host: cmd.host.clone().unwrap_or_default(),
            },
            CheckType::Dns => CheckKind::Dns {
                dns_hostname: cmd.dns_hostname.clone().unwrap_or_default(),
                dns_record_type: match cmd.dns_record_type.as_deref().map(str::to_uppercase).as_deref() {
                    Some("AAAA") => DnsRecordType::Aaaa,
                    Some("CNAME") => DnsRecordType::Cname,
                    Some("MX") => DnsRecordType::Mx,
                    Some("TXT") => DnsRecordType::Txt,
                    _ => DnsRecordType::A,
                },
                expected_dns_value: cmd.expected_dns_value.clone(),
            },
            CheckType::Postgres => CheckKind::Postgres {
                postgres_conn_string: cmd.postgres_conn_string.clone().unwrap_or_default(),
                postgres_query: cmd.postgres_query.clone(),
                expected_query_value: cmd.expected_query_value.clone(),
            },
            CheckType::Tailscale => CheckKind::Tailscale {
                tailscale_device_id: cmd.tailscale_device_id.clone().unwrap_or_default(),
            },
            CheckType::TailscaleService => CheckKind::TailscaleService {
                host: cmd.host.clone().unwrap_or_default(),
                port: cmd.port.unwrap_or(0),
                protocol: match cmd.protocol.as_deref() {
                    Some("https") => TailscaleServiceProtocol::Https,
                    Some("tcp") => TailscaleServiceProtocol::Tcp,
                    _ => TailscaleServiceProtocol::Http,
                },
                path: cmd.path.clone(),
            },
        };

        Check { header, kind }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisteredMsg {
    pub probe_id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerErrorMsg {
    pub code: String,
    pub message: String,
}
