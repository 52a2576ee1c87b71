//! Rate source collaborator for fiat/crypto conversion.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

const REQUEST_TIMEOUT_SECONDS: u64 = 10;
const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF_SECONDS: u64 = 8;

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fiat price of one unit of `cryptocurrency` in `fiat_currency`.
    async fn rate(&self, cryptocurrency: &str, fiat_currency: &str) -> ApiResult<f64>;
}

/// HTTP client against an external rate aggregator.
pub struct HttpRateSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

impl HttpRateSource {
    pub fn new(base_url: String) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn rate(&self, cryptocurrency: &str, fiat_currency: &str) -> ApiResult<f64> {
        let url = format!(
            "{}/rates/{}/{}",
            self.base_url.trim_end_matches('/'),
            cryptocurrency,
            fiat_currency
        );
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            let result = async {
                self.http
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<RateResponse>()
                    .await
            }
            .await;
            match result {
                Ok(response) => return Ok(response.rate),
                Err(err) => {
                    last_error = err.to_string();
                    let backoff_seconds =
                        (2u64.saturating_pow(attempt)).min(MAX_BACKOFF_SECONDS);
                    warn!(
                        cryptocurrency,
                        fiat_currency,
                        attempt,
                        backoff_seconds,
                        error = %last_error,
                        "rate lookup failed"
                    );
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(backoff_seconds)).await;
                    }
                }
            }
        }
        Err(ApiError::ExternalService(format!(
            "rate lookup for {cryptocurrency}/{fiat_currency} failed after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

/// Static rate table for deployments without a configured aggregator.
pub struct StaticRateSource {
    rates: HashMap<(String, String), f64>,
}

impl StaticRateSource {
    pub fn with_default_table() -> Self {
        let mut rates = HashMap::new();
        let table: &[(&str, &[(&str, f64)])] = &[
            ("BTC", &[("USD", 95000.0), ("EUR", 87000.0), ("GBP", 75000.0)]),
            ("ETH", &[("USD", 3300.0), ("EUR", 3020.0), ("GBP", 2610.0)]),
            ("USDT", &[("USD", 1.0), ("EUR", 0.92), ("GBP", 0.79)]),
            ("USDC", &[("USD", 1.0), ("EUR", 0.92), ("GBP", 0.79)]),
            ("BNB", &[("USD", 695.0), ("EUR", 636.0), ("GBP", 549.0)]),
        ];
        for (crypto, fiats) in table {
            for (fiat, rate) in *fiats {
                rates.insert((crypto.to_string(), fiat.to_string()), *rate);
            }
        }
        Self { rates }
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    async fn rate(&self, cryptocurrency: &str, fiat_currency: &str) -> ApiResult<f64> {
        self.rates
            .get(&(cryptocurrency.to_string(), fiat_currency.to_string()))
            .copied()
            .ok_or_else(|| {
                ApiError::Validation(format!(
                    "unsupported currency pair {cryptocurrency}/{fiat_currency}"
                ))
            })
    }
}
