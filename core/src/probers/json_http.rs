//! JSON-HTTP prober: HTTP plus a JSON body navigation step.

use std::time::Duration;

use serde_json::Value;

use super::http::{reqwest_method, status_ok};
use crate::model::{Check, CheckKind, CheckResult};

/// Navigates a dot-separated path into a JSON value. Each segment that
/// parses as an integer indexes an array; otherwise it's treated as an
/// object key.
pub(crate) fn navigate_json_path<'a>(value: &'a Value, path: &str) -> Result<&'a Value, String> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = if let Ok(idx) = segment.parse::<usize>() {
            match current {
                Value::Array(arr) => arr
                    .get(idx)
                    .ok_or_else(|| format!("index out of range: {idx}"))?,
                _ => return Err("cannot navigate into non-container".to_string()),
            }
        } else {
            match current {
                Value::Object(map) => map
                    .get(segment)
                    .ok_or_else(|| format!("key not found: {segment}"))?,
                _ => return Err("cannot navigate into non-container".to_string()),
            }
        };
    }
    Ok(current)
}

/// Stringifies a leaf JSON value the way the check's `expected_json_value`
/// comparison expects: strings unquoted, everything else via its JSON
/// textual form.
pub(crate) fn stringify_leaf(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn probe_json_http(check: &Check, timeout: Duration) -> CheckResult {
    let (url, method, expected_status, json_path, expected_json_value) = match &check.kind {
        CheckKind::JsonHttp {
            url,
            method,
            expected_status_codes,
            json_path,
            expected_json_value,
        } => (url, method, expected_status_codes, json_path, expected_json_value),
        _ => unreachable!("probe_json_http called on non-json_http check"),
    };

    let start = std::time::Instant::now();
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e.to_string())
        }
    };

    let result = client
        .request(reqwest_method(method), url)
        .header("Accept", "application/json")
        .send()
        .await;

    let resp = match result {
        Ok(r) => r,
        Err(e) => {
            return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e.to_string())
        }
    };

    let code = resp.status().as_u16();
    if !status_ok(code, expected_status) {
        let elapsed_ms = start.elapsed().as_millis() as u32;
        return CheckResult::failure(
            check.id(),
            code as i32,
            elapsed_ms,
            format!("unexpected status code {code}"),
        );
    }

    if json_path.is_none() {
        let elapsed_ms = start.elapsed().as_millis() as u32;
        return CheckResult::success(check.id(), code as i32, elapsed_ms);
    }

    let body: Result<Value, _> = resp.json().await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    let body = match body {
        Ok(b) => b,
        Err(e) => return CheckResult::failure(check.id(), code as i32, elapsed_ms, format!("invalid JSON body: {e}")),
    };

    let path = json_path.as_deref().unwrap();
    let leaf = match navigate_json_path(&body, path) {
        Ok(v) => v,
        Err(e) => return CheckResult::failure(check.id(), code as i32, elapsed_ms, e),
    };

    let leaf_str = stringify_leaf(leaf);

    if let Some(expected) = expected_json_value {
        if !expected.is_empty() && expected != &leaf_str {
            return CheckResult::failure(
                check.id(),
                code as i32,
                elapsed_ms,
                format!("expected value '{expected}', got '{leaf_str}'"),
            )
            .with_body(leaf_str);
        }
    }

    CheckResult::success(check.id(), code as i32, elapsed_ms).with_body(leaf_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn json_check(url: String, json_path: Option<String>, expected: Option<String>) -> Check {
        Check {
            header: crate::model::CheckHeader {
                id: 1,
                name: "svc".into(),
                interval_seconds: 60,
                timeout_seconds: 5,
                retries: 0,
                retry_delay_seconds: 1,
                enabled: true,
                created_at: chrono::Utc::now(),
                group_id: None,
                tags: BTreeSet::new(),
            },
            kind: CheckKind::JsonHttp {
                url,
                method: crate::model::HttpMethod::Get,
                expected_status_codes: [200].into_iter().collect(),
                json_path,
                expected_json_value: expected,
            },
        }
    }

    #[test]
    fn navigate_object_then_array_index() {
        let value = serde_json::json!({"status": {"checks": ["ok", "degraded"]}});
        let leaf = navigate_json_path(&value, "status.checks.1").unwrap();
        assert_eq!(leaf.as_str(), Some("degraded"));
    }

    #[test]
    fn navigate_missing_key_errors() {
        let value = serde_json::json!({"a": 1});
        let err = navigate_json_path(&value, "b").unwrap_err();
        assert!(err.contains("key not found"));
    }

    #[test]
    fn navigate_out_of_range_errors() {
        let value = serde_json::json!([1, 2]);
        let err = navigate_json_path(&value, "5").unwrap_err();
        assert!(err.contains("index out of range"));
    }

    #[test]
    fn navigate_into_scalar_errors() {
        let value = serde_json::json!({"a": 1});
        let err = navigate_json_path(&value, "a.b").unwrap_err();
        assert!(err.contains("non-container"));
    }

    #[tokio::test]
    async fn matches_expected_leaf_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;

        let check = json_check(
            format!("{}/health", server.uri()),
            Some("status".into()),
            Some("ok".into()),
        );
        let result = probe_json_http(&check, Duration::from_secs(2)).await;
        assert!(result.success);
        assert_eq!(result.response_body.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn mismatched_leaf_value_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "degraded"})))
            .mount(&server)
            .await;

        let check = json_check(
            format!("{}/health", server.uri()),
            Some("status".into()),
            Some("ok".into()),
        );
        let result = probe_json_http(&check, Duration::from_secs(2)).await;
        assert!(!result.success);
    }
}
