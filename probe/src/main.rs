//! uptime-probe — standalone process that executes checks dispatched by the
//! controller from a network region the controller itself cannot reach.

mod client;
mod config;
mod error;

use tokio::sync::watch;
use tracing::info;

use crate::config::ProbeConfig;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = ProbeConfig::from_env();

    tracing_subscriber::fmt().with_env_filter(&config.log_level).with_target(true).init();

    info!(region = %config.region, server = %config.server, "uptime-probe starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { client::run(&config, shutdown_rx).await });

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = task.await;

    info!("uptime-probe stopped");
}
