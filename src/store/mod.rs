//! Storage abstraction.
//!
//! The core state machines never touch a storage mechanism directly; they go
//! through this trait. Updates are compare-and-swap on the entity's
//! `version` field: when two callers race on the same entity exactly one
//! wins, the loser gets [`ApiError::ConcurrentModification`] and retries by
//! re-reading.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    DisputeCase, EscrowContract, Listing, SearchListingsQuery, Trade, TradeStatus,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // ===== Trades =====

    async fn insert_trade(&self, trade: &Trade) -> ApiResult<()>;

    async fn get_trade(&self, id: Uuid) -> ApiResult<Option<Trade>>;

    /// CAS update keyed on `trade.version`; the persisted copy is returned
    /// with the version bumped.
    async fn update_trade(&self, trade: &Trade) -> ApiResult<Trade>;

    async fn list_trades(
        &self,
        party_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> ApiResult<Vec<Trade>>;

    // ===== Escrow contracts =====

    async fn insert_escrow(&self, escrow: &EscrowContract) -> ApiResult<()>;

    async fn get_escrow(&self, id: Uuid) -> ApiResult<Option<EscrowContract>>;

    async fn get_escrow_by_trade(&self, trade_id: Uuid) -> ApiResult<Option<EscrowContract>>;

    async fn update_escrow(&self, escrow: &EscrowContract) -> ApiResult<EscrowContract>;

    /// Non-terminal contracts whose timeout deadline has passed.
    async fn list_due_escrows(&self, now: DateTime<Utc>) -> ApiResult<Vec<EscrowContract>>;

    // ===== Disputes =====

    async fn insert_dispute(&self, dispute: &DisputeCase) -> ApiResult<()>;

    async fn get_dispute(&self, id: Uuid) -> ApiResult<Option<DisputeCase>>;

    async fn get_open_dispute_for_escrow(
        &self,
        escrow_id: Uuid,
    ) -> ApiResult<Option<DisputeCase>>;

    /// Persist a resolved dispute and its escrow contract as one atomic
    /// operation: both writes succeed or neither is observable.
    async fn resolve_dispute(
        &self,
        dispute: &DisputeCase,
        escrow: &EscrowContract,
    ) -> ApiResult<(DisputeCase, EscrowContract)>;

    // ===== Listings =====

    async fn insert_listing(&self, listing: &Listing) -> ApiResult<()>;

    async fn get_listing(&self, id: Uuid) -> ApiResult<Option<Listing>>;

    async fn update_listing(&self, listing: &Listing) -> ApiResult<Listing>;

    async fn delete_listing(&self, id: Uuid) -> ApiResult<bool>;

    async fn search_listings(&self, filter: &SearchListingsQuery) -> ApiResult<Vec<Listing>>;
}
