//! Environment-driven configuration.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the server runs on the in-memory store.
    pub database_url: Option<String>,
    /// When unset, chain observations come from a deterministic local stub.
    pub chain_rpc_url: Option<String>,
    /// When unset, conversions use the built-in static rate table.
    pub rates_url: Option<String>,
    pub cors_allowed_origins: String,
    /// Cron expression for the escrow timeout sweep.
    pub escrow_sweep_schedule: String,
    pub chain_poll_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3001),
            database_url: env::var("DATABASE_URL").ok(),
            chain_rpc_url: env::var("CHAIN_RPC_URL").ok(),
            rates_url: env::var("RATES_URL").ok(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            // Every 5 minutes.
            escrow_sweep_schedule: env::var("ESCROW_SWEEP_SCHEDULE")
                .unwrap_or_else(|_| "0 */5 * * * *".to_string()),
            chain_poll_interval_seconds: env::var("CHAIN_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}
