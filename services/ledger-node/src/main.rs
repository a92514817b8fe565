use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sovledger_core::ledger::SqliteLedgerStore;
use sovledger_core::logging;
use sovledger_gate::SovereignGate;
use sovledger_sentinel::{spawn_crisis_relay, CounterStore, MemoryCounterStore, RedisCounterStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{info, warn};

mod config;
mod error;
mod handlers;
mod state;

use state::AppState;

fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.service.max_body_bytes;
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/v1/dispatch", post(handlers::dispatch))
        .route("/v1/bursts", post(handlers::ingest_burst))
        .route("/v1/stats", get(handlers::stats))
        .route("/v1/audit", get(handlers::audit))
        .route("/v1/breach/ack", post(handlers::acknowledge_breach))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(body_limit)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_json();

    let config = config::load()?;

    let store = SqliteLedgerStore::open(&config.ledger.path, config.ledger.busy_timeout())
        .with_context(|| format!("failed to open ledger at {}", config.ledger.path.display()))?;

    let redis = match &config.redis.url {
        Some(url) => Some(redis::Client::open(url.as_str())?),
        None => None,
    };
    let counters: Arc<dyn CounterStore> = match &redis {
        Some(client) => Arc::new(RedisCounterStore::connect(client).await?),
        None => Arc::new(MemoryCounterStore::new()),
    };

    let gate = SovereignGate::from_config(&config, Arc::new(store), counters);
    let relay = redis.map(|client| spawn_crisis_relay(gate.broadcaster(), client));

    let listen_addr = config.service.listen_addr.clone();
    let state = Arc::new(AppState::new(config, gate));

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Sovledger node listening on {}", listen_addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(relay) = relay {
        relay.abort();
    }
    info!("Sovledger node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
