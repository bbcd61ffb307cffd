//! Discord webhook notification sink.

use async_trait::async_trait;
use uptime_core::store::NotificationSink;
use uptime_core::Result;

pub struct DiscordSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordSink {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    fn content(check_name: &str, target: &str, is_up: bool, status_code: i32, response_time_ms: u32, error_message: &str) -> String {
        if is_up {
            format!("✅ **{check_name}** ({target}) is back UP — {status_code} in {response_time_ms}ms")
        } else {
            format!("🔴 **{check_name}** ({target}) is DOWN — {error_message}")
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
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
        let body = serde_json::json!({
            "content": Self::content(check_name, target, is_up, status_code, response_time_ms, error_message),
        });

        self.client
            .post(&self.webhook_url)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_differs_for_up_and_down() {
        let up = DiscordSink::content("api", "http://host", true, 200, 10, "");
        let down = DiscordSink::content("api", "http://host", false, 500, 10, "unexpected status code 500");
        assert!(up.contains("UP"));
        assert!(down.contains("DOWN"));
        assert!(down.contains("unexpected status code 500"));
    }
}
