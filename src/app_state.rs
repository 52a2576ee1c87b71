//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::rates::RateSource;
use crate::services::{EscrowService, ListingService, TradeService};

#[derive(Clone)]
pub struct AppState {
    pub listings: Arc<ListingService>,
    pub trades: Arc<TradeService>,
    pub escrows: Arc<EscrowService>,
    pub rates: Arc<dyn RateSource>,
}
