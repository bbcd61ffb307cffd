//! ICMP ping prober. Uses `surge-ping` rather than shelling out to the
//! system `ping` binary.

use std::net::IpAddr;
use std::time::Duration;

use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence, ICMP};

use crate::model::{Check, CheckKind, CheckResult};

pub async fn probe_ping(check: &Check, timeout: Duration) -> CheckResult {
    let host = match &check.kind {
        CheckKind::Ping { host } => host,
        _ => unreachable!("probe_ping called on non-ping check"),
    };

    let start = std::time::Instant::now();

    let ip: IpAddr = match resolve_host(host).await {
        Ok(ip) => ip,
        Err(e) => return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e),
    };

    let config = if ip.is_ipv6() {
        PingConfig::builder().kind(ICMP::V6).build()
    } else {
        PingConfig::builder().kind(ICMP::V4).build()
    };

    let client = match PingClient::new(&config) {
        Ok(c) => c,
        Err(e) => {
            return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e.to_string())
        }
    };

    let mut pinger = client.pinger(ip, PingIdentifier(rand_identifier())).await;
    pinger.timeout(timeout);

    let payload = [0u8; 8];
    let outcome = pinger.ping(PingSequence(0), &payload).await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match outcome {
        Ok(_) => CheckResult::success(check.id(), 200, elapsed_ms),
        Err(e) => CheckResult::failure(check.id(), 0, elapsed_ms, e.to_string()),
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| format!("DNS resolution failed: {e}"))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("no addresses found for host '{host}'"))
}

fn rand_identifier() -> u16 {
    use std::time::{SystemTime, UNIX_EPOCH};
    (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        & 0xffff) as u16
}
