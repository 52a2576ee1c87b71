//! Route definitions for the PeerTrade API.

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::app_state::AppState;
use crate::handlers::*;

pub fn listing_routes() -> Router<AppState> {
    Router::new()
        .route("/api/listings", post(create_listing))
        .route("/api/listings", get(search_listings))
        .route("/api/listings/:id", get(get_listing))
        .route("/api/listings/:id", put(update_listing))
        .route("/api/listings/:id", delete(delete_listing))
}

pub fn trade_routes() -> Router<AppState> {
    Router::new()
        .route("/api/trades", post(create_trade))
        .route("/api/trades", get(list_trades))
        .route("/api/trades/:id", get(get_trade))
        .route("/api/trades/:id/transition", post(transition_trade))
        .route("/api/trades/:id/verify-escrow", post(verify_escrow))
        .route("/api/trades/:id/messages", post(send_message))
}

pub fn escrow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/escrows", post(create_escrow))
        .route("/api/escrows/:id", get(get_escrow))
        .route("/api/escrows/:id/fund", post(fund_escrow))
        .route("/api/escrows/:id/confirm", post(confirm_payment))
        .route("/api/escrows/:id/release", post(release_escrow))
        .route("/api/escrows/:id/cancel", post(cancel_escrow))
        .route("/api/escrows/:id/disputes", post(initiate_dispute))
        .route("/api/disputes/:id/resolve", post(resolve_dispute))
}

pub fn rate_routes() -> Router<AppState> {
    Router::new().route("/api/rates/convert", get(convert))
}

/// The full API surface, shared by `main` and the integration tests.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .merge(listing_routes())
        .merge(trade_routes())
        .merge(escrow_routes())
        .merge(rate_routes())
}

async fn health_check() -> &'static str {
    "OK"
}
