//! HTTP prober.

use std::time::Duration;

use reqwest::Method;

use crate::model::{Check, CheckKind, CheckResult, HttpMethod};

pub(crate) fn reqwest_method(m: &HttpMethod) -> Method {
    match m {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

pub(crate) fn status_ok(code: u16, expected: &std::collections::BTreeSet<u16>) -> bool {
    if expected.is_empty() {
        (200..400).contains(&code)
    } else {
        expected.contains(&code)
    }
}

pub async fn probe_http(check: &Check, timeout: Duration) -> CheckResult {
    let (url, method, expected) = match &check.kind {
        CheckKind::Http {
            url,
            method,
            expected_status_codes,
        } => (url, method, expected_status_codes),
        _ => unreachable!("probe_http called on non-http check"),
    };

    let start = std::time::Instant::now();
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e.to_string())
        }
    };

    let result = client.request(reqwest_method(method), url).send().await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    match result {
        Ok(resp) => {
            let code = resp.status().as_u16();
            if status_ok(code, expected) {
                CheckResult::success(check.id(), code as i32, elapsed_ms)
            } else {
                CheckResult::failure(
                    check.id(),
                    code as i32,
                    elapsed_ms,
                    format!("unexpected status code {code}"),
                )
            }
        }
        Err(e) => CheckResult::failure(check.id(), 0, elapsed_ms, e.to_string()),
    }
}
