//! Domain services: each owns one slice of the trade/escrow lifecycle.

pub mod escrow;
pub mod listing;
pub mod trade;

pub use escrow::EscrowService;
pub use listing::ListingService;
pub use trade::TradeService;
