//! uptime-controller — catalog, scheduler, probe registry, live event bus,
//! and notification dispatch for the uptime monitoring engine.

mod config;
mod error;
mod events;
mod notify;
mod registry;
mod scheduler;
mod sse;
mod store;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;
use uptime_core::model::RegionKey;
use uptime_core::probers::{LazyTailscaleNet, TailscaleApiControl, TailscaleControl, TailscaleNet};
use uptime_core::store::Store;

use crate::events::EventBus;
use crate::notify::{DiscordSink, GotifySink, NotificationDispatcher};
use crate::registry::ProbeRegistry;
use crate::scheduler::Scheduler;
use crate::store::{MemoryStore, PostgresStore};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = config::Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(true)
        .init();

    info!("uptime-controller starting");
    info!(listen = %config.listen_addr);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            info!("connecting to Postgres");
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");

            sqlx::query(include_str!("../migrations/001_init.sql"))
                .execute(&pool)
                .await
                .unwrap_or_else(|e| {
                    info!("migration note (may already exist): {e}");
                    Default::default()
                });

            Arc::new(PostgresStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set, running against the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let events = Arc::new(EventBus::new());
    let notifier = Arc::new(NotificationDispatcher::new(load_sinks(&store).await));
    let last_status: Arc<DashMap<RegionKey, uptime_core::model::CheckResult>> = Arc::new(DashMap::new());

    let registry = Arc::new(ProbeRegistry::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&notifier),
        Arc::clone(&last_status),
    ));

    let tailscale_control = load_tailscale_control(&store).await;
    // `LazyTailscaleNet` defers the actual overlay handle until the first
    // tailscale_service check dispatches, rather than dialing out at startup.
    let tailscale_net: Option<Arc<dyn TailscaleNet>> = Some(Arc::new(LazyTailscaleNet::default()));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&notifier),
        Arc::clone(&registry),
        last_status,
        tailscale_control,
        tailscale_net,
    ));

    scheduler.start().await.expect("failed to start scheduler");

    let ws_router = Router::new().route("/ws", get(registry::ws_handler)).with_state(registry);
    let sse_router = Router::new().route("/events", get(sse::sse_handler)).with_state(events);
    let health_router = Router::new().route("/healthz", get(healthz));

    let app = Router::new()
        .merge(ws_router)
        .merge(sse_router)
        .merge(health_router)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");

    info!(addr = %config.listen_addr, "uptime-controller listening");

    axum::serve(listener, app).await.expect("server error");

    scheduler.stop().await;
}

async fn load_sinks(store: &Arc<dyn Store>) -> Vec<Arc<dyn uptime_core::store::NotificationSink>> {
    let mut sinks: Vec<Arc<dyn uptime_core::store::NotificationSink>> = Vec::new();

    if let Ok(Some(url)) = store.get_setting("discord_webhook_url").await {
        if !url.is_empty() {
            sinks.push(Arc::new(DiscordSink::new(url)));
        }
    }

    if let (Ok(Some(server)), Ok(Some(token))) = (
        store.get_setting("gotify_server_url").await,
        store.get_setting("gotify_token").await,
    ) {
        if !server.is_empty() && !token.is_empty() {
            sinks.push(Arc::new(GotifySink::new(server, token)));
        }
    }

    sinks
}

async fn load_tailscale_control(store: &Arc<dyn Store>) -> Option<Arc<dyn TailscaleControl>> {
    let api_key = store.get_setting("tailscale_api_key").await.ok().flatten()?;
    let tailnet = store.get_setting("tailscale_tailnet").await.ok().flatten()?;
    if api_key.is_empty() || tailnet.is_empty() {
        return None;
    }
    Some(Arc::new(TailscaleApiControl::new(api_key, tailnet)))
}

async fn healthz() -> &'static str {
    "ok"
}
