//! Controller configuration — all from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. If unset, the controller runs against
    /// the in-memory store.
    pub database_url: Option<String>,
    /// Listen address for the probe WebSocket endpoint, SSE, and healthz.
    pub listen_addr: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:50051".into()),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "uptime_controller=info,tower_http=info".into()),
        }
    }
}
