//! Trade lifecycle manager.
//!
//! Owns a trade's status, enforces the transition table, and keeps the
//! append-only history. Validation is pure and runs before any mutation, so
//! a rejected transition never changes state. Transitions into
//! `escrow_paid` and `incorrect_escrow` are driven by chain verification,
//! never by caller assertion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::amount::{amounts_match, AMOUNT_TOLERANCE};
use crate::chain::ChainSource;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CreateTradeRequest, ListingStatus, ListingType, MessageKind, SendMessageRequest,
    StatusHistoryEntry, Trade, TradeMessage, TradeStatus, TransitionResponse,
    VerifyEscrowResponse,
};
use crate::services::escrow::EscrowService;
use crate::store::Store;

struct TransitionRule {
    from: &'static [TradeStatus],
    to: TradeStatus,
}

/// The legal transition table. Anything not listed here is rejected with
/// `InvalidTransition`; rows carry additional preconditions checked in
/// [`TradeService::validate_transition`].
const TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        from: &[TradeStatus::Pending],
        to: TradeStatus::Active,
    },
    TransitionRule {
        from: &[TradeStatus::Active],
        to: TradeStatus::EscrowPaid,
    },
    TransitionRule {
        from: &[TradeStatus::EscrowPaid],
        to: TradeStatus::FiatPaid,
    },
    TransitionRule {
        from: &[TradeStatus::FiatPaid],
        to: TradeStatus::Completed,
    },
    TransitionRule {
        from: &[
            TradeStatus::Active,
            TradeStatus::EscrowPaid,
            TradeStatus::FiatPaid,
        ],
        to: TradeStatus::CancellationRequested,
    },
    // Withdrawal of a cancellation request reverts to the prior status.
    TransitionRule {
        from: &[TradeStatus::CancellationRequested],
        to: TradeStatus::Active,
    },
    TransitionRule {
        from: &[TradeStatus::CancellationRequested],
        to: TradeStatus::EscrowPaid,
    },
    TransitionRule {
        from: &[TradeStatus::CancellationRequested],
        to: TradeStatus::FiatPaid,
    },
    TransitionRule {
        from: &[TradeStatus::CancellationRequested],
        to: TradeStatus::Cancelled,
    },
    TransitionRule {
        from: &[TradeStatus::CancellationRequested],
        to: TradeStatus::DisputeReview,
    },
    // The confirmation poller can observe a wrong amount before or after
    // the trade reached escrow_paid.
    TransitionRule {
        from: &[TradeStatus::Active, TradeStatus::EscrowPaid],
        to: TradeStatus::IncorrectEscrow,
    },
];

pub struct TradeService {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainSource>,
    escrow: Arc<EscrowService>,
}

impl TradeService {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainSource>,
        escrow: Arc<EscrowService>,
    ) -> Self {
        Self { store, chain, escrow }
    }

    async fn load(&self, id: Uuid) -> ApiResult<Trade> {
        self.store
            .get_trade(id)
            .await?
            .ok_or_else(|| ApiError::not_found("trade", id))
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Trade> {
        self.load(id).await
    }

    pub async fn list(
        &self,
        party_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> ApiResult<Vec<Trade>> {
        self.store.list_trades(party_id, status).await
    }

    /// Initiate a trade from a marketplace listing. The trade is created
    /// `pending` and immediately activated, giving it two history entries.
    pub async fn create_trade(&self, request: CreateTradeRequest) -> ApiResult<Trade> {
        let listing = self
            .store
            .get_listing(request.listing_id)
            .await?
            .ok_or_else(|| ApiError::not_found("listing", request.listing_id))?;
        if listing.status != ListingStatus::Active {
            return Err(ApiError::invalid_state(
                "listing",
                listing.id,
                listing.status.as_str(),
                "'active'",
            ));
        }
        if request.taker_id == listing.user_id {
            return Err(ApiError::Validation(
                "a party cannot take their own listing".to_string(),
            ));
        }

        // For a sell listing the taker buys and the escrow holds the crypto
        // amount; for a buy listing the taker sells and the amount is fiat.
        let (buyer_id, seller_id) = match listing.listing_type {
            ListingType::Sell => (request.taker_id.clone(), listing.user_id.clone()),
            ListingType::Buy => (listing.user_id.clone(), request.taker_id.clone()),
        };
        let escrow_amount = match listing.listing_type {
            ListingType::Sell => request.amount,
            ListingType::Buy => request.amount / listing.price,
        };

        let now = Utc::now();
        let trade_id = Uuid::new_v4();
        let trade = Trade {
            id: trade_id,
            listing_id: listing.id,
            buyer_id,
            seller_id,
            cryptocurrency: listing.cryptocurrency.clone(),
            fiat_currency: listing.fiat_currency.clone(),
            amount: request.amount,
            price: listing.price,
            total_value: request.amount * listing.price,
            escrow_amount,
            payment_method: request.payment_method,
            status: TradeStatus::Pending,
            cancellation_requested_by: None,
            escrow_address: None,
            messages: vec![TradeMessage {
                id: Uuid::new_v4(),
                trade_id,
                sender_id: "system".to_string(),
                body: format!(
                    "Trade initiated for {} {} at {} {}. Please fund the escrow address \
                     with exactly {:.8} {} to proceed.",
                    request.amount,
                    listing.cryptocurrency,
                    listing.price,
                    listing.fiat_currency,
                    escrow_amount,
                    listing.cryptocurrency,
                ),
                kind: MessageKind::System,
                read: false,
                timestamp: now,
            }],
            status_history: vec![StatusHistoryEntry {
                status: TradeStatus::Pending,
                timestamp: now,
                description: "Trade created".to_string(),
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_trade(&trade).await?;

        let activated = self.apply(trade, TradeStatus::Active, None).await?;
        info!(trade_id = %activated.id, listing_id = %listing.id, "trade created");
        Ok(activated)
    }

    /// Canonical transition operation. Targets that depend on the chain
    /// (`escrow_paid`, `incorrect_escrow`) are routed through verification;
    /// the actual outcome follows the observed amount.
    pub async fn transition_trade(
        &self,
        id: Uuid,
        new_status: TradeStatus,
        requested_by: Option<&str>,
    ) -> ApiResult<TransitionResponse> {
        let trade = self.load(id).await?;

        // Chain-verifiable targets defer to what the chain observed. A
        // revert out of cancellation_requested back to escrow_paid is not
        // one of these; that amount was already verified.
        if matches!(
            new_status,
            TradeStatus::EscrowPaid | TradeStatus::IncorrectEscrow
        ) && matches!(
            trade.status,
            TradeStatus::Active | TradeStatus::EscrowPaid
        ) {
            let outcome = self.verify_escrow(id).await?;
            return Ok(TransitionResponse {
                previous_status: outcome.previous_status,
                new_status: outcome.new_status,
            });
        }
        let previous_status = trade.status;
        self.validate_transition(&trade, new_status, requested_by)?;
        let trade = self.apply(trade, new_status, requested_by).await?;
        self.run_side_effects(&trade).await?;
        Ok(TransitionResponse {
            previous_status,
            new_status: trade.status,
        })
    }

    /// Check the chain-observed amount for the trade's escrow address and
    /// advance the trade accordingly. Idempotent: re-verifying a settled
    /// amount repeats the same answer and changes nothing.
    pub async fn verify_escrow(&self, id: Uuid) -> ApiResult<VerifyEscrowResponse> {
        let trade = self.load(id).await?;
        let address = trade.escrow_address.clone().ok_or_else(|| {
            ApiError::invalid_state(
                "trade",
                trade.id,
                trade.status,
                "a trade with an escrow contract",
            )
        })?;
        if !matches!(
            trade.status,
            TradeStatus::Active | TradeStatus::EscrowPaid
        ) {
            return Err(ApiError::invalid_state(
                "trade",
                trade.id,
                trade.status,
                "'active' or 'escrow_paid'",
            ));
        }

        let observation = self.chain.received_amount(&address).await?;
        let previous_status = trade.status;
        let received = observation.received_amount;

        // Nothing observed yet: the escrow simply is not funded.
        if received == 0.0 {
            return Ok(VerifyEscrowResponse {
                received_amount: 0.0,
                is_exact: false,
                previous_status,
                new_status: previous_status,
            });
        }

        if amounts_match(received, trade.escrow_amount, AMOUNT_TOLERANCE) {
            let new_status = if trade.status == TradeStatus::Active {
                let trade = self.apply(trade, TradeStatus::EscrowPaid, None).await?;
                trade.status
            } else {
                trade.status
            };
            Ok(VerifyEscrowResponse {
                received_amount: received,
                is_exact: true,
                previous_status,
                new_status,
            })
        } else {
            warn!(
                trade_id = %trade.id,
                received,
                expected = trade.escrow_amount,
                "escrow amount outside tolerance"
            );
            let trade = self.apply(trade, TradeStatus::IncorrectEscrow, None).await?;
            self.run_side_effects(&trade).await?;
            Ok(VerifyEscrowResponse {
                received_amount: received,
                is_exact: false,
                previous_status,
                new_status: trade.status,
            })
        }
    }

    /// Append a message to the trade's conversation.
    pub async fn send_message(
        &self,
        id: Uuid,
        request: SendMessageRequest,
    ) -> ApiResult<TradeMessage> {
        let mut trade = self.load(id).await?;
        let message = TradeMessage {
            id: Uuid::new_v4(),
            trade_id: id,
            sender_id: request.sender_id,
            body: request.body,
            kind: request.kind.unwrap_or(MessageKind::Message),
            read: false,
            timestamp: Utc::now(),
        };
        trade.messages.push(message.clone());
        trade.updated_at = message.timestamp;
        self.store.update_trade(&trade).await?;
        Ok(message)
    }

    /// Pure validation against the table and the row preconditions.
    fn validate_transition(
        &self,
        trade: &Trade,
        to: TradeStatus,
        requested_by: Option<&str>,
    ) -> ApiResult<()> {
        let from = trade.status;
        TRANSITION_TABLE
            .iter()
            .find(|rule| rule.to == to && rule.from.contains(&from))
            .ok_or(ApiError::InvalidTransition { from, to })?;

        match to {
            TradeStatus::EscrowPaid if from == TradeStatus::Active => {
                if trade.escrow_address.is_none() {
                    return Err(ApiError::Validation(
                        "trade has no escrow contract".to_string(),
                    ));
                }
            }
            TradeStatus::IncorrectEscrow => {
                if trade.escrow_address.is_none() {
                    return Err(ApiError::Validation(
                        "trade has no escrow contract".to_string(),
                    ));
                }
            }
            TradeStatus::CancellationRequested => {
                let requester = requested_by.ok_or_else(|| {
                    ApiError::Validation(
                        "cancellation requests must identify the requesting party".to_string(),
                    )
                })?;
                if !trade.is_party(requester) {
                    return Err(ApiError::Validation(format!(
                        "{requester} is not a party to this trade"
                    )));
                }
            }
            TradeStatus::Cancelled | TradeStatus::DisputeReview
                if from == TradeStatus::CancellationRequested =>
            {
                let responder = requested_by.ok_or_else(|| {
                    ApiError::Validation(
                        "responding to a cancellation request requires the responding party"
                            .to_string(),
                    )
                })?;
                if !trade.is_party(responder) {
                    return Err(ApiError::Validation(format!(
                        "{responder} is not a party to this trade"
                    )));
                }
                if trade.cancellation_requested_by.as_deref() == Some(responder) {
                    return Err(ApiError::Validation(
                        "the requesting party cannot respond to their own cancellation request"
                            .to_string(),
                    ));
                }
            }
            TradeStatus::Active | TradeStatus::EscrowPaid | TradeStatus::FiatPaid
                if from == TradeStatus::CancellationRequested =>
            {
                let requester = requested_by.ok_or_else(|| {
                    ApiError::Validation(
                        "withdrawing a cancellation request requires the requesting party"
                            .to_string(),
                    )
                })?;
                if trade.cancellation_requested_by.as_deref() != Some(requester) {
                    return Err(ApiError::Validation(
                        "only the requesting party can withdraw their cancellation request"
                            .to_string(),
                    ));
                }
                let prior = prior_status(trade);
                if to != prior {
                    return Err(ApiError::InvalidTransition { from, to });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply a validated transition: status, bookkeeping, history, persist.
    async fn apply(
        &self,
        mut trade: Trade,
        to: TradeStatus,
        requested_by: Option<&str>,
    ) -> ApiResult<Trade> {
        let from = trade.status;
        let now = Utc::now();
        trade.status = to;
        trade.updated_at = now;
        if to == TradeStatus::CancellationRequested {
            trade.cancellation_requested_by = requested_by.map(str::to_string);
        } else {
            trade.cancellation_requested_by = None;
        }
        trade.status_history.push(StatusHistoryEntry {
            status: to,
            timestamp: now,
            description: status_description(from, to, requested_by),
        });
        let trade = self.store.update_trade(&trade).await?;
        info!(
            trade_id = %trade.id,
            from = from.as_str(),
            to = to.as_str(),
            "trade status transition"
        );
        Ok(trade)
    }

    /// Escrow-side effects after a trade transition has been persisted.
    async fn run_side_effects(&self, trade: &Trade) -> ApiResult<()> {
        match trade.status {
            // Seller release: the escrow contract follows the trade.
            TradeStatus::Completed => {
                if let Some(escrow) = self.escrow.get_by_trade(trade.id).await? {
                    match self.escrow.release(escrow.id).await {
                        Ok(_) => {}
                        Err(ApiError::InvalidState { .. }) => {
                            warn!(
                                trade_id = %trade.id,
                                escrow_id = %escrow.id,
                                "trade completed but escrow was not releasable"
                            );
                        }
                        Err(e) => {
                            error!(trade_id = %trade.id, error = %e, "escrow release failed");
                            return Err(e);
                        }
                    }
                }
            }
            // Agreed cancellation or a wrong escrow amount: refund.
            TradeStatus::Cancelled | TradeStatus::IncorrectEscrow => {
                if let Some(escrow) = self.escrow.get_by_trade(trade.id).await? {
                    match self.escrow.cancel(escrow.id).await {
                        Ok(_) => {}
                        Err(ApiError::InvalidState { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Last status before the pending cancellation request, derived from the
/// monotonic history.
fn prior_status(trade: &Trade) -> TradeStatus {
    trade
        .status_history
        .iter()
        .rev()
        .map(|entry| entry.status)
        .find(|status| *status != TradeStatus::CancellationRequested)
        .unwrap_or(TradeStatus::Active)
}

fn status_description(from: TradeStatus, to: TradeStatus, requested_by: Option<&str>) -> String {
    if from == TradeStatus::CancellationRequested
        && matches!(
            to,
            TradeStatus::Active | TradeStatus::EscrowPaid | TradeStatus::FiatPaid
        )
    {
        return "Cancellation request withdrawn".to_string();
    }
    match to {
        TradeStatus::Pending => "Trade created".to_string(),
        TradeStatus::Active => "Trade initiated, waiting for escrow payment".to_string(),
        TradeStatus::EscrowPaid => "Escrow funded, buyer can make fiat payment".to_string(),
        TradeStatus::FiatPaid => "Fiat payment sent, waiting for seller confirmation".to_string(),
        TradeStatus::Completed => "Trade completed, escrow released".to_string(),
        TradeStatus::Cancelled => "Trade cancelled by mutual agreement".to_string(),
        TradeStatus::CancellationRequested => match requested_by {
            Some(party) => format!("Cancellation requested by {party}"),
            None => "Cancellation requested".to_string(),
        },
        TradeStatus::DisputeReview => "Trade flagged for admin dispute resolution".to_string(),
        TradeStatus::IncorrectEscrow => {
            "Incorrect escrow amount received, trade cancelled and funds refunded".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FixedChainSource;
    use crate::models::{CreateEscrowRequest, EscrowStatus, Listing};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        chain: Arc<FixedChainSource>,
        escrow: Arc<EscrowService>,
        trades: TradeService,
    }

    fn fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let chain = Arc::new(FixedChainSource::new());
        let escrow = Arc::new(EscrowService::new(store.clone(), chain.clone()));
        let trades = TradeService::new(store.clone(), chain.clone(), escrow.clone());
        Fixture {
            store,
            chain,
            escrow,
            trades,
        }
    }

    fn sell_listing() -> Listing {
        let now = Utc::now();
        Listing {
            id: Uuid::new_v4(),
            user_id: "seller-1".into(),
            user_address: "0xseller".into(),
            user_trust_score: 85,
            listing_type: ListingType::Sell,
            cryptocurrency: "BTC".into(),
            fiat_currency: "USD".into(),
            amount: 0.5,
            price: 45000.0,
            min_order: 100.0,
            max_order: 25000.0,
            payment_methods: vec!["Bank Transfer".into()],
            description: String::new(),
            terms: String::new(),
            status: ListingStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    async fn trade_for(fx: &Fixture) -> Trade {
        let listing = sell_listing();
        fx.store.insert_listing(&listing).await.unwrap();
        fx.trades
            .create_trade(CreateTradeRequest {
                listing_id: listing.id,
                taker_id: "buyer-1".into(),
                amount: 0.5,
                payment_method: "Bank Transfer".into(),
            })
            .await
            .unwrap()
    }

    /// Create the escrow for a trade and report its contract address.
    async fn escrowed_trade(fx: &Fixture) -> (Trade, String) {
        let trade = trade_for(fx).await;
        let escrow = fx
            .escrow
            .create(CreateEscrowRequest {
                trade_id: trade.id,
                buyer_address: "0xbuyer".into(),
                seller_address: "0xseller".into(),
                cryptocurrency: "BTC".into(),
                amount: 0.5,
                fiat_amount: 22500.0,
                fiat_currency: "USD".into(),
            })
            .await
            .unwrap();
        fx.escrow.fund(escrow.id).await.unwrap();
        let trade = fx.trades.get(trade.id).await.unwrap();
        (trade, escrow.contract_address)
    }

    #[tokio::test]
    async fn creation_activates_and_seeds_history() {
        let fx = fixture();
        let trade = trade_for(&fx).await;

        assert_eq!(trade.status, TradeStatus::Active);
        assert_eq!(trade.buyer_id, "buyer-1");
        assert_eq!(trade.seller_id, "seller-1");
        assert_eq!(trade.total_value, 22500.0);
        assert_eq!(trade.escrow_amount, 0.5);
        let statuses: Vec<TradeStatus> =
            trade.status_history.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![TradeStatus::Pending, TradeStatus::Active]);
        assert_eq!(trade.messages.len(), 1);
        assert_eq!(trade.messages[0].kind, MessageKind::System);
    }

    #[tokio::test]
    async fn taking_own_listing_is_rejected() {
        let fx = fixture();
        let listing = sell_listing();
        fx.store.insert_listing(&listing).await.unwrap();
        let err = fx
            .trades
            .create_trade(CreateTradeRequest {
                listing_id: listing.id,
                taker_id: listing.user_id.clone(),
                amount: 0.1,
                payment_method: "Bank Transfer".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn off_table_transitions_are_rejected_without_mutation() {
        let fx = fixture();
        let trade = trade_for(&fx).await;
        let history_len = trade.status_history.len();

        for target in [
            TradeStatus::FiatPaid,
            TradeStatus::Completed,
            TradeStatus::Cancelled,
            TradeStatus::DisputeReview,
            TradeStatus::Pending,
        ] {
            let err = fx
                .trades
                .transition_trade(trade.id, target, None)
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::InvalidTransition { .. }), "{target}");
        }

        let unchanged = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(unchanged.status, TradeStatus::Active);
        assert_eq!(unchanged.status_history.len(), history_len);
    }

    #[tokio::test]
    async fn unknown_trade_is_not_found() {
        let fx = fixture();
        let err = fx
            .trades
            .transition_trade(Uuid::new_v4(), TradeStatus::FiatPaid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn exact_amount_advances_to_escrow_paid() {
        let fx = fixture();
        let (trade, address) = escrowed_trade(&fx).await;
        fx.chain.set_received(&address, 0.5, 1);

        let outcome = fx.trades.verify_escrow(trade.id).await.unwrap();
        assert!(outcome.is_exact);
        assert_eq!(outcome.previous_status, TradeStatus::Active);
        assert_eq!(outcome.new_status, TradeStatus::EscrowPaid);

        // Re-verification is idempotent.
        let again = fx.trades.verify_escrow(trade.id).await.unwrap();
        assert!(again.is_exact);
        assert_eq!(again.new_status, TradeStatus::EscrowPaid);
        let stored = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(
            stored
                .status_history
                .iter()
                .filter(|e| e.status == TradeStatus::EscrowPaid)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn wrong_amount_terminates_the_trade_and_refunds() {
        let fx = fixture();
        let (trade, address) = escrowed_trade(&fx).await;
        fx.chain.set_received(&address, 0.5001, 1);

        let outcome = fx.trades.verify_escrow(trade.id).await.unwrap();
        assert!(!outcome.is_exact);
        assert_eq!(outcome.new_status, TradeStatus::IncorrectEscrow);

        // Escrow refunded (cancelled) and trade terminal.
        let escrow = fx.escrow.get_by_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(escrow.status, EscrowStatus::Cancelled);
        let err = fx
            .trades
            .transition_trade(trade.id, TradeStatus::FiatPaid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unfunded_escrow_address_is_not_a_mismatch() {
        let fx = fixture();
        let (trade, _address) = escrowed_trade(&fx).await;

        let outcome = fx.trades.verify_escrow(trade.id).await.unwrap();
        assert_eq!(outcome.received_amount, 0.0);
        assert_eq!(outcome.new_status, TradeStatus::Active);
    }

    #[tokio::test]
    async fn verification_requires_an_escrow_contract() {
        let fx = fixture();
        let trade = trade_for(&fx).await;
        let err = fx.trades.verify_escrow(trade.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn happy_path_completes_and_releases_escrow() {
        let fx = fixture();
        let (trade, address) = escrowed_trade(&fx).await;
        fx.chain.set_received(&address, 0.5, 1);
        fx.trades.verify_escrow(trade.id).await.unwrap();

        let step = fx
            .trades
            .transition_trade(trade.id, TradeStatus::FiatPaid, Some("buyer-1"))
            .await
            .unwrap();
        assert_eq!(step.new_status, TradeStatus::FiatPaid);

        let step = fx
            .trades
            .transition_trade(trade.id, TradeStatus::Completed, Some("seller-1"))
            .await
            .unwrap();
        assert_eq!(step.previous_status, TradeStatus::FiatPaid);
        assert_eq!(step.new_status, TradeStatus::Completed);

        let escrow = fx.escrow.get_by_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
    }

    #[tokio::test]
    async fn cancellation_race_rules() {
        let fx = fixture();
        let trade = trade_for(&fx).await;

        // A requests cancellation.
        fx.trades
            .transition_trade(trade.id, TradeStatus::CancellationRequested, Some("buyer-1"))
            .await
            .unwrap();
        let stored = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(stored.cancellation_requested_by.as_deref(), Some("buyer-1"));
        let history_len = stored.status_history.len();

        // A re-requesting is rejected; no duplicate history entry.
        let err = fx
            .trades
            .transition_trade(trade.id, TradeStatus::CancellationRequested, Some("buyer-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert_eq!(
            fx.trades.get(trade.id).await.unwrap().status_history.len(),
            history_len
        );

        // A cannot accept their own request.
        let err = fx
            .trades
            .transition_trade(trade.id, TradeStatus::Cancelled, Some("buyer-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // B declines: dispute review.
        fx.trades
            .transition_trade(trade.id, TradeStatus::DisputeReview, Some("seller-1"))
            .await
            .unwrap();
        let stored = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::DisputeReview);
        assert_eq!(stored.cancellation_requested_by, None);
    }

    #[tokio::test]
    async fn accepting_cancellation_cancels_trade_and_escrow() {
        let fx = fixture();
        let (trade, _address) = escrowed_trade(&fx).await;

        fx.trades
            .transition_trade(trade.id, TradeStatus::CancellationRequested, Some("buyer-1"))
            .await
            .unwrap();
        let step = fx
            .trades
            .transition_trade(trade.id, TradeStatus::Cancelled, Some("seller-1"))
            .await
            .unwrap();
        assert_eq!(step.new_status, TradeStatus::Cancelled);

        let escrow = fx.escrow.get_by_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(escrow.status, EscrowStatus::Cancelled);
    }

    #[tokio::test]
    async fn withdrawal_reverts_to_the_prior_status() {
        let fx = fixture();
        let (trade, address) = escrowed_trade(&fx).await;
        fx.chain.set_received(&address, 0.5, 1);
        fx.trades.verify_escrow(trade.id).await.unwrap();

        fx.trades
            .transition_trade(trade.id, TradeStatus::CancellationRequested, Some("buyer-1"))
            .await
            .unwrap();

        // The counterparty cannot withdraw, and the requester can only
        // revert to the status the trade actually came from.
        let err = fx
            .trades
            .transition_trade(trade.id, TradeStatus::EscrowPaid, Some("seller-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let err = fx
            .trades
            .transition_trade(trade.id, TradeStatus::Active, Some("buyer-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        let step = fx
            .trades
            .transition_trade(trade.id, TradeStatus::EscrowPaid, Some("buyer-1"))
            .await
            .unwrap();
        assert_eq!(step.new_status, TradeStatus::EscrowPaid);
        let stored = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(stored.cancellation_requested_by, None);
    }

    #[tokio::test]
    async fn outsiders_cannot_request_cancellation() {
        let fx = fixture();
        let trade = trade_for(&fx).await;
        let err = fx
            .trades
            .transition_trade(
                trade.id,
                TradeStatus::CancellationRequested,
                Some("stranger"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn messages_append_to_the_conversation() {
        let fx = fixture();
        let trade = trade_for(&fx).await;
        let message = fx
            .trades
            .send_message(
                trade.id,
                SendMessageRequest {
                    sender_id: "buyer-1".into(),
                    body: "Payment on its way".into(),
                    kind: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(message.kind, MessageKind::Message);
        let stored = fx.trades.get(trade.id).await.unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[1].body, "Payment on its way");
    }
}
