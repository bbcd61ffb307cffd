//! Probe configuration — CLI flags with environment-variable fallback.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "uptime-probe", about = "Remote check executor for the uptime monitoring engine")]
pub struct ProbeConfig {
    /// Short ASCII region identifier this probe reports under, e.g. "eu-west-1".
    #[arg(long, env = "PROBE_REGION")]
    pub region: String,

    /// Pre-provisioned probe token; the controller validates its hash.
    #[arg(long, env = "PROBE_TOKEN")]
    pub token: String,

    /// Controller WebSocket endpoint, e.g. "ws://controller:50051/ws".
    #[arg(long, env = "PROBE_SERVER", default_value = "ws://127.0.0.1:50051/ws")]
    pub server: String,

    #[arg(long, env = "RUST_LOG", default_value = "uptime_probe=info")]
    pub log_level: String,
}

impl ProbeConfig {
    pub fn from_env() -> Self {
        Self::parse()
    }
}
