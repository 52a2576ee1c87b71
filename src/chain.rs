//! Blockchain confirmation source.
//!
//! The trade lifecycle never trusts a caller's claim that an escrow address
//! was funded; it asks this collaborator what the chain has actually seen.
//! The HTTP implementation polls an external confirmation API with request
//! timeouts and bounded exponential-backoff retry; exhaustion surfaces an
//! `ExternalService` error and leaves all entities untouched.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

const REQUEST_TIMEOUT_SECONDS: u64 = 10;
const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF_SECONDS: u64 = 8;

/// What the chain has observed for an address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainObservation {
    pub received_amount: f64,
    pub confirmations: u32,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Total amount received at `address`, with confirmation count.
    /// An address the chain has not seen funds for reports 0.0.
    async fn received_amount(&self, address: &str) -> ApiResult<ChainObservation>;
}

/// HTTP client against an external confirmation API.
pub struct HttpChainSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ReceivedResponse {
    received_amount: f64,
    #[serde(default)]
    confirmations: u32,
}

impl HttpChainSource {
    pub fn new(base_url: String) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    async fn fetch_once(&self, address: &str) -> Result<ChainObservation, reqwest::Error> {
        let url = format!(
            "{}/addresses/{}/received",
            self.base_url.trim_end_matches('/'),
            address
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ReceivedResponse>()
            .await?;
        Ok(ChainObservation {
            received_amount: response.received_amount,
            confirmations: response.confirmations,
        })
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn received_amount(&self, address: &str) -> ApiResult<ChainObservation> {
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.fetch_once(address).await {
                Ok(observation) => return Ok(observation),
                Err(err) => {
                    last_error = err.to_string();
                    let backoff_seconds =
                        (2u64.saturating_pow(attempt)).min(MAX_BACKOFF_SECONDS);
                    warn!(
                        address,
                        attempt,
                        backoff_seconds,
                        error = %last_error,
                        "chain lookup failed"
                    );
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(backoff_seconds)).await;
                    }
                }
            }
        }
        Err(ApiError::ExternalService(format!(
            "chain lookup for {address} failed after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

/// Deterministic chain source for tests and local runs. Addresses report
/// exactly what was programmed, every time.
#[derive(Default)]
pub struct FixedChainSource {
    observations: Mutex<HashMap<String, ChainObservation>>,
}

impl FixedChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_received(&self, address: &str, amount: f64, confirmations: u32) {
        self.observations.lock().unwrap().insert(
            address.to_string(),
            ChainObservation {
                received_amount: amount,
                confirmations,
            },
        );
    }
}

#[async_trait]
impl ChainSource for FixedChainSource {
    async fn received_amount(&self, address: &str) -> ApiResult<ChainObservation> {
        Ok(self
            .observations
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_source_is_deterministic() {
        let source = FixedChainSource::new();
        source.set_received("0xabc", 0.5, 3);

        for _ in 0..5 {
            let obs = source.received_amount("0xabc").await.unwrap();
            assert_eq!(obs.received_amount, 0.5);
            assert_eq!(obs.confirmations, 3);
        }

        let unseen = source.received_amount("0xdef").await.unwrap();
        assert_eq!(unseen.received_amount, 0.0);
    }
}
