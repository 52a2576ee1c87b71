//! PeerTrade backend: trade lifecycle, escrow custody and dispute
//! arbitration for a P2P crypto exchange.

pub mod amount;
pub mod app_state;
pub mod chain;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poller;
pub mod rates;
pub mod routes;
pub mod services;
pub mod store;
pub mod sweeper;
