//! Gotify push-notification sink.

use async_trait::async_trait;
use uptime_core::store::NotificationSink;
use uptime_core::Result;

pub struct GotifySink {
    client: reqwest::Client,
    server_url: String,
    token: String,
}

impl GotifySink {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            token: token.into(),
        }
    }

    fn title(check_name: &str, is_up: bool) -> String {
        if is_up {
            format!("{check_name} is UP")
        } else {
            format!("{check_name} is DOWN")
        }
    }
}

#[async_trait]
impl NotificationSink for GotifySink {
    fn name(&self) -> &str {
        "gotify"
    }

    async fn send_status_change(
        &self,
        check_name: &str,
        target: &str,
        is_up: bool,
        status_code: i32,
        response_time_ms: u32,
        error_message: &str,
    ) -> Result<()> {
        let message = if is_up {
            format!("{target} responded {status_code} in {response_time_ms}ms")
        } else {
            format!("{target}: {error_message}")
        };

        let url = format!("{}/message?token={}", self.server_url.trim_end_matches('/'), self.token);
        let body = serde_json::json!({
            "title": Self::title(check_name, is_up),
            "message": message,
            "priority": if is_up { 4 } else { 8 },
        });

        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| uptime_core::Error::Protocol(e.to_string()))?
            .error_for_status()
            .map_err(|e| uptime_core::Error::Protocol(e.to_string()))?;

        Ok(())
    }

    async fn test_webhook(&self) -> Result<()> {
        self.send_status_change("test check", "test target", true, 200, 0, "").await
    }
}
