//! DNS prober, built on `trust-dns-resolver`.

use std::time::Duration;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::model::{Check, CheckKind, CheckResult, DnsRecordType};

async fn lookup(resolver: &TokioAsyncResolver, hostname: &str, record_type: DnsRecordType) -> Result<Vec<String>, String> {
    match record_type {
        DnsRecordType::A => {
            let rsp = resolver.ipv4_lookup(hostname).await.map_err(|e| e.to_string())?;
            Ok(rsp.iter().map(|ip| ip.to_string()).collect())
        }
        DnsRecordType::Aaaa => {
            let rsp = resolver.ipv6_lookup(hostname).await.map_err(|e| e.to_string())?;
            Ok(rsp.iter().map(|ip| ip.to_string()).collect())
        }
        DnsRecordType::Cname => {
            let rsp = resolver
                .lookup(hostname, trust_dns_resolver::proto::rr::RecordType::CNAME)
                .await
                .map_err(|e| e.to_string())?;
            Ok(rsp.iter().map(|r| r.to_string()).collect())
        }
        DnsRecordType::Mx => {
            let rsp = resolver.mx_lookup(hostname).await.map_err(|e| e.to_string())?;
            Ok(rsp.iter().map(|mx| format!("{} {}", mx.preference(), mx.exchange())).collect())
        }
        DnsRecordType::Txt => {
            let rsp = resolver.txt_lookup(hostname).await.map_err(|e| e.to_string())?;
            Ok(rsp.iter().map(|txt| txt.to_string()).collect())
        }
    }
}

/// Checks whether `expected` is present verbatim, or as a substring of any
/// returned record.
pub(crate) fn matches_expected(records: &[String], expected: &str) -> bool {
    records.iter().any(|r| r == expected || r.contains(expected))
}

pub async fn probe_dns(check: &Check, timeout: Duration) -> CheckResult {
    let (hostname, record_type, expected) = match &check.kind {
        CheckKind::Dns {
            dns_hostname,
            dns_record_type,
            expected_dns_value,
        } => (dns_hostname, *dns_record_type, expected_dns_value),
        _ => unreachable!("probe_dns called on non-dns check"),
    };

    let start = std::time::Instant::now();
    let resolver = match TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) {
        r => r,
    };

    let outcome = tokio::time::timeout(timeout, lookup(&resolver, hostname, record_type)).await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    let records = match outcome {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => return CheckResult::failure(check.id(), 0, elapsed_ms, e),
        Err(_) => return CheckResult::failure(check.id(), 0, elapsed_ms, "DNS lookup timed out"),
    };

    if records.is_empty() {
        return CheckResult::failure(check.id(), 0, elapsed_ms, format!("no records found for {hostname}"));
    }

    let body = records.join(", ");

    if let Some(expected) = expected {
        if !expected.is_empty() && !matches_expected(&records, expected) {
            return CheckResult::failure(
                check.id(),
                0,
                elapsed_ms,
                format!("expected value '{expected}' not found"),
            )
            .with_body(body);
        }
    }

    CheckResult::success(check.id(), 200, elapsed_ms).with_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_expected_exact() {
        let records = vec!["1.2.3.4".to_string(), "5.6.7.8".to_string()];
        assert!(matches_expected(&records, "1.2.3.4"));
        assert!(!matches_expected(&records, "9.9.9.9"));
    }

    #[test]
    fn matches_expected_substring() {
        let records = vec!["v=spf1 include:example.com ~all".to_string()];
        assert!(matches_expected(&records, "include:example.com"));
    }
}
