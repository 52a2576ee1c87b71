//! Escrow contract manager.
//!
//! Owns the funds-custody lifecycle: `created -> funded -> released` on the
//! happy path, `created|funded -> cancelled`, `funded -> disputed ->
//! resolved`. Terminal contracts (`released`, `resolved`, `cancelled`) are
//! never mutated again. Every operation checks its precondition state and
//! fails with `InvalidState` instead of silently succeeding.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::amount::{amounts_match, compute_fees, AMOUNT_TOLERANCE};
use crate::chain::ChainSource;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    ArbitratorDecision, CreateEscrowRequest, DisputeCase, DisputeStatus, EscrowContract,
    EscrowStatus, InitiateDisputeRequest, TradeRole, TradeStatus,
};
use crate::store::Store;

/// Platform arbitrator address; a fixed role, not a per-contract input.
pub const PLATFORM_ARBITRATOR_ADDRESS: &str = "0xArbitrator123";

/// Contracts left unfunded or unreleased past this window are eligible for
/// automatic cancellation by the sweep.
pub const ESCROW_TIMEOUT_HOURS: i64 = 24;

/// How many times an internal read-modify-write retries on a lost CAS race
/// before surfacing `ConcurrentModification` to the caller.
const LINK_RETRY_ATTEMPTS: u32 = 3;

pub struct EscrowService {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainSource>,
}

/// Outcome of a chain-side amount verification.
#[derive(Debug, Clone, Copy)]
pub struct AmountVerification {
    pub received_amount: f64,
    pub is_exact: bool,
}

impl EscrowService {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn ChainSource>) -> Self {
        Self { store, chain }
    }

    async fn load(&self, id: Uuid) -> ApiResult<EscrowContract> {
        self.store
            .get_escrow(id)
            .await?
            .ok_or_else(|| ApiError::not_found("escrow", id))
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<EscrowContract> {
        self.load(id).await
    }

    pub async fn get_by_trade(&self, trade_id: Uuid) -> ApiResult<Option<EscrowContract>> {
        self.store.get_escrow_by_trade(trade_id).await
    }

    /// Create an escrow contract for a trade. One contract per trade; the
    /// generated contract address is linked back onto the trade record.
    pub async fn create(&self, request: CreateEscrowRequest) -> ApiResult<EscrowContract> {
        let trade = self
            .store
            .get_trade(request.trade_id)
            .await?
            .ok_or_else(|| ApiError::not_found("trade", request.trade_id))?;
        if trade.status != TradeStatus::Active {
            return Err(ApiError::invalid_state(
                "trade",
                trade.id,
                trade.status,
                "'active'",
            ));
        }
        if let Some(existing) = self.store.get_escrow_by_trade(trade.id).await? {
            return Err(ApiError::invalid_state(
                "trade",
                trade.id,
                format!("already escrowed by contract {}", existing.id),
                "a trade without an escrow contract",
            ));
        }

        let now = Utc::now();
        let escrow = EscrowContract {
            id: Uuid::new_v4(),
            trade_id: trade.id,
            buyer_address: request.buyer_address,
            seller_address: request.seller_address,
            arbitrator_address: PLATFORM_ARBITRATOR_ADDRESS.to_string(),
            cryptocurrency: request.cryptocurrency,
            amount: request.amount,
            fiat_amount: request.fiat_amount,
            fiat_currency: request.fiat_currency,
            contract_address: generate_address(),
            status: EscrowStatus::Created,
            buyer_confirmed: false,
            seller_confirmed: false,
            dispute_reason: None,
            resolution: None,
            arbitrator_decision: None,
            fees: compute_fees(request.fiat_amount),
            created_at: now,
            funded_at: None,
            released_at: None,
            disputed_at: None,
            resolved_at: None,
            timeout_at: now + Duration::hours(ESCROW_TIMEOUT_HOURS),
            version: 1,
            updated_at: now,
        };
        self.store.insert_escrow(&escrow).await?;
        self.link_trade(trade.id, &escrow.contract_address).await?;

        info!(
            escrow_id = %escrow.id,
            trade_id = %escrow.trade_id,
            contract_address = %escrow.contract_address,
            "escrow contract created"
        );
        Ok(escrow)
    }

    /// Attach the contract address to the trade, retrying lost CAS races.
    async fn link_trade(&self, trade_id: Uuid, contract_address: &str) -> ApiResult<()> {
        for _ in 0..LINK_RETRY_ATTEMPTS {
            let mut trade = self
                .store
                .get_trade(trade_id)
                .await?
                .ok_or_else(|| ApiError::not_found("trade", trade_id))?;
            trade.escrow_address = Some(contract_address.to_string());
            trade.updated_at = Utc::now();
            match self.store.update_trade(&trade).await {
                Ok(_) => return Ok(()),
                Err(ApiError::ConcurrentModification { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ApiError::ConcurrentModification {
            entity: "trade",
            id: trade_id.to_string(),
        })
    }

    /// Execute the funding transaction. Only a `created` contract can be
    /// funded, which also makes the operation exactly-once.
    pub async fn fund(&self, id: Uuid) -> ApiResult<EscrowContract> {
        let mut escrow = self.load(id).await?;
        if escrow.status != EscrowStatus::Created {
            return Err(ApiError::invalid_state(
                "escrow",
                id,
                escrow.status,
                "'created'",
            ));
        }
        let now = Utc::now();
        escrow.status = EscrowStatus::Funded;
        escrow.funded_at = Some(now);
        escrow.updated_at = now;
        let escrow = self.store.update_escrow(&escrow).await?;
        info!(
            escrow_id = %id,
            tx_hash = %generate_tx_hash(),
            "escrow funding transaction submitted"
        );
        Ok(escrow)
    }

    /// Record a party's payment confirmation. Both confirmations together do
    /// NOT release the contract: the explicit `release` call is the single
    /// authority over release.
    pub async fn confirm_payment(&self, id: Uuid, role: TradeRole) -> ApiResult<EscrowContract> {
        let mut escrow = self.load(id).await?;
        if escrow.status != EscrowStatus::Funded {
            return Err(ApiError::invalid_state(
                "escrow",
                id,
                escrow.status,
                "'funded'",
            ));
        }
        match role {
            TradeRole::Buyer => escrow.buyer_confirmed = true,
            TradeRole::Seller => escrow.seller_confirmed = true,
        }
        escrow.updated_at = Utc::now();
        let escrow = self.store.update_escrow(&escrow).await?;
        if escrow.buyer_confirmed && escrow.seller_confirmed {
            info!(escrow_id = %id, "both parties confirmed; awaiting explicit release");
        }
        Ok(escrow)
    }

    /// Release the escrowed funds to their destination.
    pub async fn release(&self, id: Uuid) -> ApiResult<EscrowContract> {
        let mut escrow = self.load(id).await?;
        if escrow.status != EscrowStatus::Funded {
            return Err(ApiError::invalid_state(
                "escrow",
                id,
                escrow.status,
                "'funded'",
            ));
        }
        let now = Utc::now();
        escrow.status = EscrowStatus::Released;
        escrow.released_at = Some(now);
        escrow.updated_at = now;
        let escrow = self.store.update_escrow(&escrow).await?;
        info!(escrow_id = %id, "escrow released");
        Ok(escrow)
    }

    /// Cancel a contract that has not completed. Cancelling a funded
    /// contract initiates the refund flow.
    pub async fn cancel(&self, id: Uuid) -> ApiResult<EscrowContract> {
        let mut escrow = self.load(id).await?;
        if !matches!(escrow.status, EscrowStatus::Created | EscrowStatus::Funded) {
            return Err(ApiError::invalid_state(
                "escrow",
                id,
                escrow.status,
                "'created' or 'funded'",
            ));
        }
        let was_funded = escrow.status == EscrowStatus::Funded;
        escrow.status = EscrowStatus::Cancelled;
        escrow.updated_at = Utc::now();
        let escrow = self.store.update_escrow(&escrow).await?;
        if was_funded {
            info!(
                escrow_id = %id,
                refund_tx = %generate_tx_hash(),
                "escrow cancelled; refund initiated"
            );
        } else {
            info!(escrow_id = %id, "escrow cancelled before funding");
        }
        Ok(escrow)
    }

    /// Idempotent expiry transition for the timeout sweep. Returns true when
    /// the contract was cancelled, false when nothing was due.
    pub async fn expire(&self, id: Uuid) -> ApiResult<bool> {
        let escrow = self.load(id).await?;
        if escrow.status.is_terminal() || escrow.status == EscrowStatus::Disputed {
            return Ok(false);
        }
        if escrow.timeout_at > Utc::now() {
            return Ok(false);
        }
        match self.cancel(id).await {
            Ok(_) => {
                warn!(escrow_id = %id, "escrow expired past its timeout deadline");
                Ok(true)
            }
            // Someone else finished the contract between the read and the
            // cancel; expiry has nothing left to do.
            Err(ApiError::InvalidState { .. }) | Err(ApiError::ConcurrentModification { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep entry point: expire every due contract.
    pub async fn expire_due(&self) -> ApiResult<Vec<Uuid>> {
        let due = self.store.list_due_escrows(Utc::now()).await?;
        let mut expired = Vec::new();
        for escrow in due {
            if self.expire(escrow.id).await? {
                expired.push(escrow.id);
            }
        }
        Ok(expired)
    }

    /// Open a dispute on a funded contract. At most one open dispute per
    /// contract.
    pub async fn initiate_dispute(
        &self,
        escrow_id: Uuid,
        request: InitiateDisputeRequest,
    ) -> ApiResult<DisputeCase> {
        let mut escrow = self.load(escrow_id).await?;
        if escrow.status != EscrowStatus::Funded {
            return Err(ApiError::invalid_state(
                "escrow",
                escrow_id,
                escrow.status,
                "'funded'",
            ));
        }
        if let Some(open) = self.store.get_open_dispute_for_escrow(escrow_id).await? {
            return Err(ApiError::invalid_state(
                "escrow",
                escrow_id,
                format!("already disputed by case {}", open.id),
                "a contract without an open dispute",
            ));
        }

        let now = Utc::now();
        escrow.status = EscrowStatus::Disputed;
        escrow.disputed_at = Some(now);
        escrow.dispute_reason = Some(request.reason.clone());
        escrow.updated_at = now;
        self.store.update_escrow(&escrow).await?;

        let dispute = DisputeCase {
            id: Uuid::new_v4(),
            escrow_id,
            initiated_by: request.initiated_by,
            reason: request.reason,
            evidence: request.evidence,
            status: DisputeStatus::Open,
            arbitrator_notes: None,
            resolution: None,
            created_at: now,
            resolved_at: None,
            version: 1,
        };
        self.store.insert_dispute(&dispute).await?;
        warn!(
            escrow_id = %escrow_id,
            dispute_id = %dispute.id,
            initiated_by = dispute.initiated_by.as_str(),
            "escrow disputed"
        );
        Ok(dispute)
    }

    /// Arbitration: record a decision on an open dispute. Updates the
    /// dispute and its escrow contract as one atomic operation.
    pub async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        decision: ArbitratorDecision,
        notes: &str,
    ) -> ApiResult<DisputeCase> {
        if notes.trim().is_empty() {
            return Err(ApiError::Validation(
                "arbitrator notes must not be empty".to_string(),
            ));
        }

        let mut dispute = self
            .store
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| ApiError::not_found("dispute", dispute_id))?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(ApiError::invalid_state(
                "dispute",
                dispute_id,
                "resolved",
                "'open' or 'under_review'",
            ));
        }
        let mut escrow = self.load(dispute.escrow_id).await?;
        if escrow.status != EscrowStatus::Disputed {
            return Err(ApiError::invalid_state(
                "escrow",
                escrow.id,
                escrow.status,
                "'disputed'",
            ));
        }

        let now = Utc::now();
        dispute.status = DisputeStatus::Resolved;
        dispute.arbitrator_notes = Some(notes.to_string());
        dispute.resolution = Some(format!("Funds awarded to {decision}"));
        dispute.resolved_at = Some(now);

        escrow.status = EscrowStatus::Resolved;
        escrow.arbitrator_decision = Some(decision);
        escrow.resolution = Some(format!("Dispute resolved in favor of {decision}"));
        escrow.resolved_at = Some(now);
        escrow.updated_at = now;

        let (dispute, _escrow) = self.store.resolve_dispute(&dispute, &escrow).await?;
        info!(
            dispute_id = %dispute_id,
            decision = decision.as_str(),
            "dispute resolved"
        );
        Ok(dispute)
    }

    /// Compare what the chain has received at an address against the
    /// required amount. Deterministic: same inputs, same answer.
    pub async fn verify_amount(
        &self,
        address: &str,
        expected_amount: f64,
        tolerance: Option<f64>,
    ) -> ApiResult<AmountVerification> {
        let observation = self.chain.received_amount(address).await?;
        let tolerance = tolerance.unwrap_or(AMOUNT_TOLERANCE);
        Ok(AmountVerification {
            received_amount: observation.received_amount,
            is_exact: amounts_match(observation.received_amount, expected_amount, tolerance),
        })
    }
}

fn generate_address() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    format!("0x{}", hex::encode(bytes))
}

fn generate_tx_hash() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    format!("0x{}", hex::encode(bytes))
}
