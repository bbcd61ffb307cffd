//! Probers: wall-clock-measured functions of `(Check, deadline) ->
//! CheckResult`, used both by the local scheduler and by remote probe
//! processes.

mod dns;
mod http;
mod json_http;
mod ping;
mod postgres;
mod tailscale;
mod tailscale_service;

pub use dns::probe_dns;
pub use http::probe_http;
pub use json_http::probe_json_http;
pub use ping::probe_ping;
pub use postgres::probe_postgres;
pub use tailscale::{probe_tailscale, TailscaleApiControl, TailscaleControl};
pub use tailscale_service::{probe_tailscale_service, DirectTcpNet, LazyTailscaleNet, TailscaleNet};

use std::time::Duration;

use crate::model::{Check, CheckKind, CheckResult};

/// Dispatches to the prober matching `check.kind`. `tailscale`/
/// `tailscale_service` require their respective collaborator; pass `None`
/// when unavailable and the check fails with an explanatory message.
pub async fn run_check(
    check: &Check,
    tailscale_control: Option<&dyn TailscaleControl>,
    tailscale_net: Option<&dyn TailscaleNet>,
) -> CheckResult {
    let timeout = Duration::from_secs(check.header.timeout_seconds as u64);

    let mut result = match &check.kind {
        CheckKind::Http { .. } => probe_http(check, timeout).await,
        CheckKind::JsonHttp { .. } => probe_json_http(check, timeout).await,
        CheckKind::Ping { .. } => probe_ping(check, timeout).await,
        CheckKind::Dns { .. } => probe_dns(check, timeout).await,
        CheckKind::Postgres { .. } => probe_postgres(check, timeout).await,
        CheckKind::Tailscale { .. } => match tailscale_control {
            Some(ctrl) => probe_tailscale(check, ctrl, timeout).await,
            None => CheckResult::failure(check.id(), 0, 0, "tailscale control API not configured"),
        },
        CheckKind::TailscaleService { .. } => match tailscale_net {
            Some(net) => probe_tailscale_service(check, net, timeout).await,
            None => CheckResult::failure(check.id(), 0, 0, "tailscale network endpoint not configured"),
        },
    };

    result.check_id = check.id();
    result
}
