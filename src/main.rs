//! PeerTrade backend server.
//!
//! Wires the storage backend, chain and rate collaborators, the HTTP API,
//! the escrow timeout sweep and the supervised chain confirmation poller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tokio::time::sleep;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use peertrade_server::app_state::AppState;
use peertrade_server::chain::{ChainSource, FixedChainSource, HttpChainSource};
use peertrade_server::config::Config;
use peertrade_server::rates::{HttpRateSource, RateSource, StaticRateSource};
use peertrade_server::routes;
use peertrade_server::services::{EscrowService, ListingService, TradeService};
use peertrade_server::store::{MemoryStore, PgStore, Store};
use peertrade_server::{poller, sweeper};

const POLLER_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set; running on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let chain: Arc<dyn ChainSource> = match &config.chain_rpc_url {
        Some(url) => Arc::new(HttpChainSource::new(url.clone())?),
        None => {
            warn!("CHAIN_RPC_URL not set; chain observations come from a local stub");
            Arc::new(FixedChainSource::new())
        }
    };
    let rates: Arc<dyn RateSource> = match &config.rates_url {
        Some(url) => Arc::new(HttpRateSource::new(url.clone())?),
        None => Arc::new(StaticRateSource::with_default_table()),
    };

    let escrows = Arc::new(EscrowService::new(store.clone(), chain.clone()));
    let trades = Arc::new(TradeService::new(
        store.clone(),
        chain.clone(),
        escrows.clone(),
    ));
    let listings = Arc::new(ListingService::new(store.clone()));

    let state = AppState {
        listings,
        trades: trades.clone(),
        escrows: escrows.clone(),
        rates,
    };

    let app = routes::api_router()
        .with_state(state)
        .layer(build_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http());

    // Keep the scheduler alive for the lifetime of the process.
    let _sweeper = sweeper::start(escrows, &config.escrow_sweep_schedule)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start escrow sweep: {e}"))?;

    // Supervise the chain confirmation poller with bounded restart backoff.
    let poll_interval = Duration::from_secs(config.chain_poll_interval_seconds);
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        loop {
            let handle = tokio::spawn(poller::run(trades.clone(), poll_interval));
            match handle.await {
                Ok(Ok(())) => {
                    info!("chain poller exited cleanly; stopping supervisor");
                    break;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "chain poller failed; restarting");
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!("chain poller panicked; restarting");
                    } else {
                        error!(error = %join_error, "chain poller task failed; restarting");
                    }
                }
            }
            restart_count = restart_count.saturating_add(1);
            let backoff_seconds = (2u64.saturating_pow(restart_count.min(5)))
                .min(POLLER_SUPERVISOR_MAX_BACKOFF_SECONDS);
            warn!(restart_count, backoff_seconds, "chain poller restart backoff");
            sleep(Duration::from_secs(backoff_seconds)).await;
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("server starting on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    let origins = allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(false)
}
