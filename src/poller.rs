//! Chain confirmation poller.
//!
//! Periodically re-checks every `active` trade that has an escrow address
//! and advances it through `verify_escrow`. A lookup failure for one trade
//! never stops the sweep over the others; a failing chain source surfaces
//! as an error so the supervisor in `main` can restart the poller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ApiResult;
use crate::models::TradeStatus;
use crate::services::TradeService;

pub async fn run(trades: Arc<TradeService>, poll_interval: Duration) -> ApiResult<()> {
    loop {
        poll_once(&trades).await?;
        tokio::time::sleep(poll_interval).await;
    }
}

async fn poll_once(trades: &TradeService) -> ApiResult<()> {
    let active = trades.list(None, Some(TradeStatus::Active)).await?;
    for trade in active {
        if trade.escrow_address.is_none() {
            continue;
        }
        match trades.verify_escrow(trade.id).await {
            Ok(outcome) if outcome.previous_status != outcome.new_status => {
                debug!(
                    trade_id = %trade.id,
                    new_status = outcome.new_status.as_str(),
                    "poller advanced trade"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(trade_id = %trade.id, error = %e, "escrow verification failed");
            }
        }
    }
    Ok(())
}
