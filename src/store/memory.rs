//! In-memory store.
//!
//! Backs tests and DATABASE_URL-less deployments. All maps live behind one
//! lock so multi-entity writes (dispute resolution) are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    DisputeCase, DisputeStatus, EscrowContract, Listing, SearchListingsQuery, Trade, TradeStatus,
};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    trades: HashMap<Uuid, Trade>,
    escrows: HashMap<Uuid, EscrowContract>,
    disputes: HashMap<Uuid, DisputeCase>,
    listings: HashMap<Uuid, Listing>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cas_check(stored: i64, incoming: i64, entity: &'static str, id: Uuid) -> ApiResult<()> {
    if stored != incoming {
        return Err(ApiError::ConcurrentModification {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_trade(&self, trade: &Trade) -> ApiResult<()> {
        self.inner
            .write()
            .await
            .trades
            .insert(trade.id, trade.clone());
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> ApiResult<Option<Trade>> {
        Ok(self.inner.read().await.trades.get(&id).cloned())
    }

    async fn update_trade(&self, trade: &Trade) -> ApiResult<Trade> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .trades
            .get_mut(&trade.id)
            .ok_or_else(|| ApiError::not_found("trade", trade.id))?;
        cas_check(stored.version, trade.version, "trade", trade.id)?;
        let mut updated = trade.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_trades(
        &self,
        party_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> ApiResult<Vec<Trade>> {
        let inner = self.inner.read().await;
        let mut trades: Vec<Trade> = inner
            .trades
            .values()
            .filter(|t| party_id.map_or(true, |p| t.is_party(p)))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trades)
    }

    async fn insert_escrow(&self, escrow: &EscrowContract) -> ApiResult<()> {
        self.inner
            .write()
            .await
            .escrows
            .insert(escrow.id, escrow.clone());
        Ok(())
    }

    async fn get_escrow(&self, id: Uuid) -> ApiResult<Option<EscrowContract>> {
        Ok(self.inner.read().await.escrows.get(&id).cloned())
    }

    async fn get_escrow_by_trade(&self, trade_id: Uuid) -> ApiResult<Option<EscrowContract>> {
        Ok(self
            .inner
            .read()
            .await
            .escrows
            .values()
            .find(|e| e.trade_id == trade_id)
            .cloned())
    }

    async fn update_escrow(&self, escrow: &EscrowContract) -> ApiResult<EscrowContract> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .escrows
            .get_mut(&escrow.id)
            .ok_or_else(|| ApiError::not_found("escrow", escrow.id))?;
        cas_check(stored.version, escrow.version, "escrow", escrow.id)?;
        let mut updated = escrow.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_due_escrows(&self, now: DateTime<Utc>) -> ApiResult<Vec<EscrowContract>> {
        Ok(self
            .inner
            .read()
            .await
            .escrows
            .values()
            .filter(|e| !e.status.is_terminal() && e.timeout_at <= now)
            .cloned()
            .collect())
    }

    async fn insert_dispute(&self, dispute: &DisputeCase) -> ApiResult<()> {
        self.inner
            .write()
            .await
            .disputes
            .insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn get_dispute(&self, id: Uuid) -> ApiResult<Option<DisputeCase>> {
        Ok(self.inner.read().await.disputes.get(&id).cloned())
    }

    async fn get_open_dispute_for_escrow(
        &self,
        escrow_id: Uuid,
    ) -> ApiResult<Option<DisputeCase>> {
        Ok(self
            .inner
            .read()
            .await
            .disputes
            .values()
            .find(|d| d.escrow_id == escrow_id && d.status != DisputeStatus::Resolved)
            .cloned())
    }

    async fn resolve_dispute(
        &self,
        dispute: &DisputeCase,
        escrow: &EscrowContract,
    ) -> ApiResult<(DisputeCase, EscrowContract)> {
        let mut inner = self.inner.write().await;

        // Validate both versions before touching either record.
        let stored_dispute = inner
            .disputes
            .get(&dispute.id)
            .ok_or_else(|| ApiError::not_found("dispute", dispute.id))?;
        cas_check(stored_dispute.version, dispute.version, "dispute", dispute.id)?;
        let stored_escrow = inner
            .escrows
            .get(&escrow.id)
            .ok_or_else(|| ApiError::not_found("escrow", escrow.id))?;
        cas_check(stored_escrow.version, escrow.version, "escrow", escrow.id)?;

        let mut new_dispute = dispute.clone();
        new_dispute.version += 1;
        let mut new_escrow = escrow.clone();
        new_escrow.version += 1;
        inner.disputes.insert(new_dispute.id, new_dispute.clone());
        inner.escrows.insert(new_escrow.id, new_escrow.clone());
        Ok((new_dispute, new_escrow))
    }

    async fn insert_listing(&self, listing: &Listing) -> ApiResult<()> {
        self.inner
            .write()
            .await
            .listings
            .insert(listing.id, listing.clone());
        Ok(())
    }

    async fn get_listing(&self, id: Uuid) -> ApiResult<Option<Listing>> {
        Ok(self.inner.read().await.listings.get(&id).cloned())
    }

    async fn update_listing(&self, listing: &Listing) -> ApiResult<Listing> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .listings
            .get_mut(&listing.id)
            .ok_or_else(|| ApiError::not_found("listing", listing.id))?;
        cas_check(stored.version, listing.version, "listing", listing.id)?;
        let mut updated = listing.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_listing(&self, id: Uuid) -> ApiResult<bool> {
        Ok(self.inner.write().await.listings.remove(&id).is_some())
    }

    async fn search_listings(&self, filter: &SearchListingsQuery) -> ApiResult<Vec<Listing>> {
        let inner = self.inner.read().await;
        let mut listings: Vec<Listing> = inner
            .listings
            .values()
            .filter(|l| filter.listing_type.map_or(true, |t| l.listing_type == t))
            .filter(|l| {
                filter
                    .cryptocurrency
                    .as_deref()
                    .map_or(true, |c| l.cryptocurrency == c)
            })
            .filter(|l| {
                filter
                    .fiat_currency
                    .as_deref()
                    .map_or(true, |c| l.fiat_currency == c)
            })
            .filter(|l| {
                filter
                    .payment_method
                    .as_deref()
                    .map_or(true, |m| l.payment_methods.iter().any(|pm| pm == m))
            })
            .filter(|l| {
                filter
                    .min_trust_score
                    .map_or(true, |min| l.user_trust_score >= min)
            })
            .cloned()
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EscrowStatus, StatusHistoryEntry};
    use crate::amount::compute_fees;

    fn sample_trade() -> Trade {
        let now = Utc::now();
        Trade {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: "buyer-1".into(),
            seller_id: "seller-1".into(),
            cryptocurrency: "BTC".into(),
            fiat_currency: "USD".into(),
            amount: 0.5,
            price: 45000.0,
            total_value: 22500.0,
            escrow_amount: 0.5,
            payment_method: "Bank Transfer".into(),
            status: TradeStatus::Active,
            cancellation_requested_by: None,
            escrow_address: None,
            messages: vec![],
            status_history: vec![StatusHistoryEntry {
                status: TradeStatus::Active,
                timestamp: now,
                description: "Trade initiated".into(),
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn stale_version_loses_the_race() {
        let store = MemoryStore::new();
        let trade = sample_trade();
        store.insert_trade(&trade).await.unwrap();

        // First writer wins and bumps the version.
        let mut first = trade.clone();
        first.status = TradeStatus::EscrowPaid;
        let persisted = store.update_trade(&first).await.unwrap();
        assert_eq!(persisted.version, trade.version + 1);

        // Second writer still holds the original version and must retry.
        let mut second = trade.clone();
        second.status = TradeStatus::CancellationRequested;
        let err = store.update_trade(&second).await.unwrap_err();
        assert!(matches!(err, ApiError::ConcurrentModification { .. }));

        // After re-reading, the retry succeeds.
        let fresh = store.get_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TradeStatus::EscrowPaid);
    }

    #[tokio::test]
    async fn due_escrows_exclude_terminal_contracts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut escrow = EscrowContract {
            id: Uuid::new_v4(),
            trade_id: Uuid::new_v4(),
            buyer_address: "0xb".into(),
            seller_address: "0xs".into(),
            arbitrator_address: "0xa".into(),
            cryptocurrency: "BTC".into(),
            amount: 0.5,
            fiat_amount: 22500.0,
            fiat_currency: "USD".into(),
            contract_address: "0xc".into(),
            status: EscrowStatus::Created,
            buyer_confirmed: false,
            seller_confirmed: false,
            dispute_reason: None,
            resolution: None,
            arbitrator_decision: None,
            fees: compute_fees(22500.0),
            created_at: now - chrono::Duration::hours(25),
            funded_at: None,
            released_at: None,
            disputed_at: None,
            resolved_at: None,
            timeout_at: now - chrono::Duration::hours(1),
            version: 1,
            updated_at: now,
        };
        store.insert_escrow(&escrow).await.unwrap();
        assert_eq!(store.list_due_escrows(now).await.unwrap().len(), 1);

        escrow.status = EscrowStatus::Released;
        store.update_escrow(&escrow).await.unwrap();
        assert!(store.list_due_escrows(now).await.unwrap().is_empty());
    }
}
