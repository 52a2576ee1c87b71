//! Data models for the PeerTrade backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Trade lifecycle status.
///
/// This is the canonical vocabulary. The legacy names `paid`, `confirmed`
/// and `disputed` from the listing-initiated flow are accepted at the serde
/// and storage boundaries and normalized to `fiat_paid`, `completed` and
/// `dispute_review`; they are never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Active,
    EscrowPaid,
    #[serde(alias = "paid")]
    FiatPaid,
    #[serde(alias = "confirmed")]
    Completed,
    Cancelled,
    CancellationRequested,
    #[serde(alias = "disputed")]
    DisputeReview,
    IncorrectEscrow,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Active => "active",
            TradeStatus::EscrowPaid => "escrow_paid",
            TradeStatus::FiatPaid => "fiat_paid",
            TradeStatus::Completed => "completed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::CancellationRequested => "cancellation_requested",
            TradeStatus::DisputeReview => "dispute_review",
            TradeStatus::IncorrectEscrow => "incorrect_escrow",
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Completed
                | TradeStatus::Cancelled
                | TradeStatus::DisputeReview
                | TradeStatus::IncorrectEscrow
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "active" => Ok(TradeStatus::Active),
            "escrow_paid" => Ok(TradeStatus::EscrowPaid),
            // Legacy aliases from the listing-initiated numeric flow.
            "fiat_paid" | "paid" => Ok(TradeStatus::FiatPaid),
            "completed" | "confirmed" => Ok(TradeStatus::Completed),
            "cancelled" => Ok(TradeStatus::Cancelled),
            "cancellation_requested" => Ok(TradeStatus::CancellationRequested),
            "dispute_review" | "disputed" => Ok(TradeStatus::DisputeReview),
            "incorrect_escrow" => Ok(TradeStatus::IncorrectEscrow),
            other => Err(format!("unknown trade status: {other}")),
        }
    }
}

/// Kind of a trade chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    System,
    PaymentProof,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMessage {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub sender_id: String,
    pub body: String,
    pub kind: MessageKind,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Append-only trade status history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: TradeStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// One P2P exchange between a buyer and a seller, derived from a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: String,
    pub seller_id: String,
    pub cryptocurrency: String,
    pub fiat_currency: String,
    /// Crypto amount being traded.
    pub amount: f64,
    /// Fiat price per crypto unit.
    pub price: f64,
    pub total_value: f64,
    /// Required escrow amount in crypto units, 8-decimal precision.
    pub escrow_amount: f64,
    pub payment_method: String,
    pub status: TradeStatus,
    /// Present only while status is `cancellation_requested`.
    pub cancellation_requested_by: Option<String>,
    /// Set once an escrow contract has been created for this trade.
    pub escrow_address: Option<String>,
    pub messages: Vec<TradeMessage>,
    pub status_history: Vec<StatusHistoryEntry>,
    /// Optimistic concurrency token, bumped on every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

/// Escrow contract custody status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Funded,
    Released,
    Disputed,
    Resolved,
    Cancelled,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Created => "created",
            EscrowStatus::Funded => "funded",
            EscrowStatus::Released => "released",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Resolved => "resolved",
            EscrowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released | EscrowStatus::Resolved | EscrowStatus::Cancelled
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EscrowStatus::Created),
            "funded" => Ok(EscrowStatus::Funded),
            "released" => Ok(EscrowStatus::Released),
            "disputed" => Ok(EscrowStatus::Disputed),
            "resolved" => Ok(EscrowStatus::Resolved),
            "cancelled" => Ok(EscrowStatus::Cancelled),
            other => Err(format!("unknown escrow status: {other}")),
        }
    }
}

/// Fee breakdown computed at escrow creation, fiat-denominated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EscrowFees {
    pub escrow_fee: f64,
    pub arbitration_fee: f64,
    pub network_fee: f64,
}

impl EscrowFees {
    pub fn total(&self) -> f64 {
        self.escrow_fee + self.arbitration_fee + self.network_fee
    }
}

/// Role of a trade party, used for payment confirmation and disputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRole {
    Buyer,
    Seller,
}

impl TradeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeRole::Buyer => "buyer",
            TradeRole::Seller => "seller",
        }
    }
}

impl FromStr for TradeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(TradeRole::Buyer),
            "seller" => Ok(TradeRole::Seller),
            other => Err(format!("unknown trade role: {other}")),
        }
    }
}

/// Arbitrator decision on a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitratorDecision {
    Buyer,
    Seller,
    Split,
}

impl ArbitratorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArbitratorDecision::Buyer => "buyer",
            ArbitratorDecision::Seller => "seller",
            ArbitratorDecision::Split => "split",
        }
    }
}

impl fmt::Display for ArbitratorDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArbitratorDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(ArbitratorDecision::Buyer),
            "seller" => Ok(ArbitratorDecision::Seller),
            "split" => Ok(ArbitratorDecision::Split),
            other => Err(format!("unknown arbitrator decision: {other}")),
        }
    }
}

/// Custody record holding funds pending trade completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowContract {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub buyer_address: String,
    pub seller_address: String,
    pub arbitrator_address: String,
    pub cryptocurrency: String,
    pub amount: f64,
    pub fiat_amount: f64,
    pub fiat_currency: String,
    pub contract_address: String,
    pub status: EscrowStatus,
    pub buyer_confirmed: bool,
    pub seller_confirmed: bool,
    pub dispute_reason: Option<String>,
    pub resolution: Option<String>,
    pub arbitrator_decision: Option<ArbitratorDecision>,
    pub fees: EscrowFees,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Past this instant a created/funded contract is eligible for expiry.
    pub timeout_at: DateTime<Utc>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Dispute case status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for DisputeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(DisputeStatus::Open),
            "under_review" => Ok(DisputeStatus::UnderReview),
            "resolved" => Ok(DisputeStatus::Resolved),
            other => Err(format!("unknown dispute status: {other}")),
        }
    }
}

/// Escalation record tied to exactly one escrow contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeCase {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub initiated_by: TradeRole,
    pub reason: String,
    pub evidence: Vec<String>,
    pub status: DisputeStatus,
    pub arbitrator_notes: Option<String>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// Side of a marketplace listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Buy,
    Sell,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Buy => "buy",
            ListingType::Sell => "sell",
        }
    }
}

impl FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(ListingType::Buy),
            "sell" => Ok(ListingType::Sell),
            other => Err(format!("unknown listing type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Paused => "paused",
            ListingStatus::Completed => "completed",
            ListingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "paused" => Ok(ListingStatus::Paused),
            "completed" => Ok(ListingStatus::Completed),
            "cancelled" => Ok(ListingStatus::Cancelled),
            other => Err(format!("unknown listing status: {other}")),
        }
    }
}

/// Marketplace listing that seeds new trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub user_id: String,
    pub user_address: String,
    pub user_trust_score: i32,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub cryptocurrency: String,
    pub fiat_currency: String,
    pub amount: f64,
    pub price: f64,
    pub min_order: f64,
    pub max_order: f64,
    pub payment_methods: Vec<String>,
    pub description: String,
    pub terms: String,
    pub status: ListingStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ===== Request / response payloads =====

#[derive(Debug, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub user_address: String,
    #[serde(default)]
    pub user_trust_score: i32,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    #[validate(length(min = 1))]
    pub cryptocurrency: String,
    #[validate(length(min = 1))]
    pub fiat_currency: String,
    #[validate(range(min = 0.00000001))]
    pub amount: f64,
    #[validate(range(min = 0.00000001))]
    pub price: f64,
    #[validate(range(min = 0.0))]
    pub min_order: f64,
    #[validate(range(min = 0.0))]
    pub max_order: f64,
    #[validate(length(min = 1))]
    pub payment_methods: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub terms: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateListingRequest {
    #[validate(range(min = 0.00000001))]
    pub amount: Option<f64>,
    #[validate(range(min = 0.00000001))]
    pub price: Option<f64>,
    pub status: Option<ListingStatus>,
    pub payment_methods: Option<Vec<String>>,
    pub description: Option<String>,
    pub terms: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchListingsQuery {
    #[serde(rename = "type")]
    pub listing_type: Option<ListingType>,
    pub cryptocurrency: Option<String>,
    pub fiat_currency: Option<String>,
    pub payment_method: Option<String>,
    pub min_trust_score: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTradeRequest {
    pub listing_id: Uuid,
    /// Identity of the party taking the listing, supplied by the caller's
    /// identity layer.
    #[validate(length(min = 1))]
    pub taker_id: String,
    #[validate(range(min = 0.00000001))]
    pub amount: f64,
    #[validate(length(min = 1))]
    pub payment_method: String,
}

#[derive(Debug, Deserialize)]
pub struct TransitionTradeRequest {
    pub status: TradeStatus,
    pub requested_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub previous_status: TradeStatus,
    pub new_status: TradeStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1))]
    pub sender_id: String,
    #[validate(length(min = 1))]
    pub body: String,
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTradesQuery {
    pub party_id: Option<String>,
    pub status: Option<TradeStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEscrowRequest {
    pub trade_id: Uuid,
    #[validate(length(min = 1))]
    pub buyer_address: String,
    #[validate(length(min = 1))]
    pub seller_address: String,
    #[validate(length(min = 1))]
    pub cryptocurrency: String,
    #[validate(range(min = 0.00000001))]
    pub amount: f64,
    #[validate(range(min = 0.01))]
    pub fiat_amount: f64,
    #[validate(length(min = 1))]
    pub fiat_currency: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub role: TradeRole,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiateDisputeRequest {
    pub initiated_by: TradeRole,
    #[validate(length(min = 1))]
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDisputeRequest {
    pub decision: ArbitratorDecision,
    pub notes: String,
}

/// Result of a chain-side escrow amount verification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerifyEscrowResponse {
    pub received_amount: f64,
    pub is_exact: bool,
    pub previous_status: TradeStatus,
    pub new_status: TradeStatus,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub fiat_amount: f64,
    pub fiat_currency: String,
    pub cryptocurrency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub crypto_amount: f64,
    pub rate: f64,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
