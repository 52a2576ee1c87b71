//! Postgres store backed by sqlx.
//!
//! Statuses are stored as their canonical text form (the alias-aware
//! `FromStr` impls absorb legacy rows); message and history collections are
//! JSON-encoded text columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    DisputeCase, DisputeStatus, EscrowContract, EscrowFees, EscrowStatus, Listing, ListingStatus,
    ListingType, SearchListingsQuery, StatusHistoryEntry, Trade, TradeMessage, TradeRole,
    TradeStatus,
};
use crate::store::Store;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> ApiResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse<T, E: std::fmt::Display>(value: Result<T, E>) -> ApiResult<T> {
    value.map_err(|e| ApiError::Storage(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> ApiResult<T> {
    serde_json::from_str(raw).map_err(|e| ApiError::Storage(e.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> ApiResult<String> {
    serde_json::to_string(value).map_err(|e| ApiError::Storage(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    id: Uuid,
    listing_id: Uuid,
    buyer_id: String,
    seller_id: String,
    cryptocurrency: String,
    fiat_currency: String,
    amount: f64,
    price: f64,
    total_value: f64,
    escrow_amount: f64,
    payment_method: String,
    status: String,
    cancellation_requested_by: Option<String>,
    escrow_address: Option<String>,
    messages: String,
    status_history: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TradeRow {
    fn into_trade(self) -> ApiResult<Trade> {
        Ok(Trade {
            id: self.id,
            listing_id: self.listing_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            cryptocurrency: self.cryptocurrency,
            fiat_currency: self.fiat_currency,
            amount: self.amount,
            price: self.price,
            total_value: self.total_value,
            escrow_amount: self.escrow_amount,
            payment_method: self.payment_method,
            status: parse(self.status.parse::<TradeStatus>())?,
            cancellation_requested_by: self.cancellation_requested_by,
            escrow_address: self.escrow_address,
            messages: decode_json::<Vec<TradeMessage>>(&self.messages)?,
            status_history: decode_json::<Vec<StatusHistoryEntry>>(&self.status_history)?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EscrowRow {
    id: Uuid,
    trade_id: Uuid,
    buyer_address: String,
    seller_address: String,
    arbitrator_address: String,
    cryptocurrency: String,
    amount: f64,
    fiat_amount: f64,
    fiat_currency: String,
    contract_address: String,
    status: String,
    buyer_confirmed: bool,
    seller_confirmed: bool,
    dispute_reason: Option<String>,
    resolution: Option<String>,
    arbitrator_decision: Option<String>,
    escrow_fee: f64,
    arbitration_fee: f64,
    network_fee: f64,
    created_at: DateTime<Utc>,
    funded_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    disputed_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    timeout_at: DateTime<Utc>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl EscrowRow {
    fn into_escrow(self) -> ApiResult<EscrowContract> {
        let arbitrator_decision = match self.arbitrator_decision {
            Some(raw) => Some(parse(raw.parse())?),
            None => None,
        };
        Ok(EscrowContract {
            id: self.id,
            trade_id: self.trade_id,
            buyer_address: self.buyer_address,
            seller_address: self.seller_address,
            arbitrator_address: self.arbitrator_address,
            cryptocurrency: self.cryptocurrency,
            amount: self.amount,
            fiat_amount: self.fiat_amount,
            fiat_currency: self.fiat_currency,
            contract_address: self.contract_address,
            status: parse(self.status.parse::<EscrowStatus>())?,
            buyer_confirmed: self.buyer_confirmed,
            seller_confirmed: self.seller_confirmed,
            dispute_reason: self.dispute_reason,
            resolution: self.resolution,
            arbitrator_decision,
            fees: EscrowFees {
                escrow_fee: self.escrow_fee,
                arbitration_fee: self.arbitration_fee,
                network_fee: self.network_fee,
            },
            created_at: self.created_at,
            funded_at: self.funded_at,
            released_at: self.released_at,
            disputed_at: self.disputed_at,
            resolved_at: self.resolved_at,
            timeout_at: self.timeout_at,
            version: self.version,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DisputeRow {
    id: Uuid,
    escrow_id: Uuid,
    initiated_by: String,
    reason: String,
    evidence: String,
    status: String,
    arbitrator_notes: Option<String>,
    resolution: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    version: i64,
}

impl DisputeRow {
    fn into_dispute(self) -> ApiResult<DisputeCase> {
        Ok(DisputeCase {
            id: self.id,
            escrow_id: self.escrow_id,
            initiated_by: parse(self.initiated_by.parse::<TradeRole>())?,
            reason: self.reason,
            evidence: decode_json::<Vec<String>>(&self.evidence)?,
            status: parse(self.status.parse::<DisputeStatus>())?,
            arbitrator_notes: self.arbitrator_notes,
            resolution: self.resolution,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            version: self.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    user_id: String,
    user_address: String,
    user_trust_score: i32,
    listing_type: String,
    cryptocurrency: String,
    fiat_currency: String,
    amount: f64,
    price: f64,
    min_order: f64,
    max_order: f64,
    payment_methods: String,
    description: String,
    terms: String,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_listing(self) -> ApiResult<Listing> {
        Ok(Listing {
            id: self.id,
            user_id: self.user_id,
            user_address: self.user_address,
            user_trust_score: self.user_trust_score,
            listing_type: parse(self.listing_type.parse::<ListingType>())?,
            cryptocurrency: self.cryptocurrency,
            fiat_currency: self.fiat_currency,
            amount: self.amount,
            price: self.price,
            min_order: self.min_order,
            max_order: self.max_order,
            payment_methods: decode_json::<Vec<String>>(&self.payment_methods)?,
            description: self.description,
            terms: self.terms,
            status: parse(self.status.parse::<ListingStatus>())?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Distinguish a stale version from a missing row after a zero-row UPDATE.
async fn classify_update_miss(
    pool: &PgPool,
    table: &str,
    entity: &'static str,
    id: Uuid,
) -> ApiError {
    let exists = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await;
    match exists {
        Ok(Some(_)) => ApiError::ConcurrentModification {
            entity,
            id: id.to_string(),
        },
        Ok(None) => ApiError::not_found(entity, id),
        Err(e) => ApiError::Storage(e.to_string()),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_trade(&self, trade: &Trade) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, listing_id, buyer_id, seller_id, cryptocurrency, fiat_currency,
                amount, price, total_value, escrow_amount, payment_method, status,
                cancellation_requested_by, escrow_address, messages, status_history,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(trade.id)
        .bind(trade.listing_id)
        .bind(&trade.buyer_id)
        .bind(&trade.seller_id)
        .bind(&trade.cryptocurrency)
        .bind(&trade.fiat_currency)
        .bind(trade.amount)
        .bind(trade.price)
        .bind(trade.total_value)
        .bind(trade.escrow_amount)
        .bind(&trade.payment_method)
        .bind(trade.status.as_str())
        .bind(&trade.cancellation_requested_by)
        .bind(&trade.escrow_address)
        .bind(encode_json(&trade.messages)?)
        .bind(encode_json(&trade.status_history)?)
        .bind(trade.version)
        .bind(trade.created_at)
        .bind(trade.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> ApiResult<Option<Trade>> {
        let row = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TradeRow::into_trade).transpose()
    }

    async fn update_trade(&self, trade: &Trade) -> ApiResult<Trade> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                status = $1, cancellation_requested_by = $2, escrow_address = $3,
                messages = $4, status_history = $5, version = version + 1, updated_at = $6
            WHERE id = $7 AND version = $8
            "#,
        )
        .bind(trade.status.as_str())
        .bind(&trade.cancellation_requested_by)
        .bind(&trade.escrow_address)
        .bind(encode_json(&trade.messages)?)
        .bind(encode_json(&trade.status_history)?)
        .bind(trade.updated_at)
        .bind(trade.id)
        .bind(trade.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(classify_update_miss(&self.pool, "trades", "trade", trade.id).await);
        }
        let mut updated = trade.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn list_trades(
        &self,
        party_id: Option<&str>,
        status: Option<TradeStatus>,
    ) -> ApiResult<Vec<Trade>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM trades WHERE 1=1");
        if let Some(party) = party_id {
            builder.push(" AND (buyer_id = ");
            builder.push_bind(party);
            builder.push(" OR seller_id = ");
            builder.push_bind(party);
            builder.push(")");
        }
        if let Some(status) = status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build_query_as::<TradeRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TradeRow::into_trade).collect()
    }

    async fn insert_escrow(&self, escrow: &EscrowContract) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO escrows (
                id, trade_id, buyer_address, seller_address, arbitrator_address,
                cryptocurrency, amount, fiat_amount, fiat_currency, contract_address,
                status, buyer_confirmed, seller_confirmed, dispute_reason, resolution,
                arbitrator_decision, escrow_fee, arbitration_fee, network_fee,
                created_at, funded_at, released_at, disputed_at, resolved_at,
                timeout_at, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
            "#,
        )
        .bind(escrow.id)
        .bind(escrow.trade_id)
        .bind(&escrow.buyer_address)
        .bind(&escrow.seller_address)
        .bind(&escrow.arbitrator_address)
        .bind(&escrow.cryptocurrency)
        .bind(escrow.amount)
        .bind(escrow.fiat_amount)
        .bind(&escrow.fiat_currency)
        .bind(&escrow.contract_address)
        .bind(escrow.status.as_str())
        .bind(escrow.buyer_confirmed)
        .bind(escrow.seller_confirmed)
        .bind(&escrow.dispute_reason)
        .bind(&escrow.resolution)
        .bind(escrow.arbitrator_decision.map(|d| d.as_str()))
        .bind(escrow.fees.escrow_fee)
        .bind(escrow.fees.arbitration_fee)
        .bind(escrow.fees.network_fee)
        .bind(escrow.created_at)
        .bind(escrow.funded_at)
        .bind(escrow.released_at)
        .bind(escrow.disputed_at)
        .bind(escrow.resolved_at)
        .bind(escrow.timeout_at)
        .bind(escrow.version)
        .bind(escrow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_escrow(&self, id: Uuid) -> ApiResult<Option<EscrowContract>> {
        let row = sqlx::query_as::<_, EscrowRow>("SELECT * FROM escrows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EscrowRow::into_escrow).transpose()
    }

    async fn get_escrow_by_trade(&self, trade_id: Uuid) -> ApiResult<Option<EscrowContract>> {
        let row = sqlx::query_as::<_, EscrowRow>("SELECT * FROM escrows WHERE trade_id = $1")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EscrowRow::into_escrow).transpose()
    }

    async fn update_escrow(&self, escrow: &EscrowContract) -> ApiResult<EscrowContract> {
        let result = sqlx::query(
            r#"
            UPDATE escrows SET
                status = $1, buyer_confirmed = $2, seller_confirmed = $3,
                dispute_reason = $4, resolution = $5, arbitrator_decision = $6,
                funded_at = $7, released_at = $8, disputed_at = $9, resolved_at = $10,
                version = version + 1, updated_at = $11
            WHERE id = $12 AND version = $13
            "#,
        )
        .bind(escrow.status.as_str())
        .bind(escrow.buyer_confirmed)
        .bind(escrow.seller_confirmed)
        .bind(&escrow.dispute_reason)
        .bind(&escrow.resolution)
        .bind(escrow.arbitrator_decision.map(|d| d.as_str()))
        .bind(escrow.funded_at)
        .bind(escrow.released_at)
        .bind(escrow.disputed_at)
        .bind(escrow.resolved_at)
        .bind(escrow.updated_at)
        .bind(escrow.id)
        .bind(escrow.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(classify_update_miss(&self.pool, "escrows", "escrow", escrow.id).await);
        }
        let mut updated = escrow.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn list_due_escrows(&self, now: DateTime<Utc>) -> ApiResult<Vec<EscrowContract>> {
        let rows = sqlx::query_as::<_, EscrowRow>(
            r#"
            SELECT * FROM escrows
            WHERE timeout_at <= $1 AND status IN ('created', 'funded')
            ORDER BY timeout_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EscrowRow::into_escrow).collect()
    }

    async fn insert_dispute(&self, dispute: &DisputeCase) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO disputes (
                id, escrow_id, initiated_by, reason, evidence, status,
                arbitrator_notes, resolution, created_at, resolved_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(dispute.id)
        .bind(dispute.escrow_id)
        .bind(dispute.initiated_by.as_str())
        .bind(&dispute.reason)
        .bind(encode_json(&dispute.evidence)?)
        .bind(dispute.status.as_str())
        .bind(&dispute.arbitrator_notes)
        .bind(&dispute.resolution)
        .bind(dispute.created_at)
        .bind(dispute.resolved_at)
        .bind(dispute.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_dispute(&self, id: Uuid) -> ApiResult<Option<DisputeCase>> {
        let row = sqlx::query_as::<_, DisputeRow>("SELECT * FROM disputes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DisputeRow::into_dispute).transpose()
    }

    async fn get_open_dispute_for_escrow(
        &self,
        escrow_id: Uuid,
    ) -> ApiResult<Option<DisputeCase>> {
        let row = sqlx::query_as::<_, DisputeRow>(
            "SELECT * FROM disputes WHERE escrow_id = $1 AND status != 'resolved'",
        )
        .bind(escrow_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DisputeRow::into_dispute).transpose()
    }

    async fn resolve_dispute(
        &self,
        dispute: &DisputeCase,
        escrow: &EscrowContract,
    ) -> ApiResult<(DisputeCase, EscrowContract)> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE disputes SET
                status = $1, arbitrator_notes = $2, resolution = $3,
                resolved_at = $4, version = version + 1
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(dispute.status.as_str())
        .bind(&dispute.arbitrator_notes)
        .bind(&dispute.resolution)
        .bind(dispute.resolved_at)
        .bind(dispute.id)
        .bind(dispute.version)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::ConcurrentModification {
                entity: "dispute",
                id: dispute.id.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE escrows SET
                status = $1, resolution = $2, arbitrator_decision = $3,
                resolved_at = $4, version = version + 1, updated_at = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(escrow.status.as_str())
        .bind(&escrow.resolution)
        .bind(escrow.arbitrator_decision.map(|d| d.as_str()))
        .bind(escrow.resolved_at)
        .bind(escrow.updated_at)
        .bind(escrow.id)
        .bind(escrow.version)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the dispute update.
            return Err(ApiError::ConcurrentModification {
                entity: "escrow",
                id: escrow.id.to_string(),
            });
        }

        tx.commit().await?;

        let mut new_dispute = dispute.clone();
        new_dispute.version += 1;
        let mut new_escrow = escrow.clone();
        new_escrow.version += 1;
        Ok((new_dispute, new_escrow))
    }

    async fn insert_listing(&self, listing: &Listing) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO listings (
                id, user_id, user_address, user_trust_score, listing_type,
                cryptocurrency, fiat_currency, amount, price, min_order, max_order,
                payment_methods, description, terms, status, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(listing.id)
        .bind(&listing.user_id)
        .bind(&listing.user_address)
        .bind(listing.user_trust_score)
        .bind(listing.listing_type.as_str())
        .bind(&listing.cryptocurrency)
        .bind(&listing.fiat_currency)
        .bind(listing.amount)
        .bind(listing.price)
        .bind(listing.min_order)
        .bind(listing.max_order)
        .bind(encode_json(&listing.payment_methods)?)
        .bind(&listing.description)
        .bind(&listing.terms)
        .bind(listing.status.as_str())
        .bind(listing.version)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_listing(&self, id: Uuid) -> ApiResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>("SELECT * FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ListingRow::into_listing).transpose()
    }

    async fn update_listing(&self, listing: &Listing) -> ApiResult<Listing> {
        let result = sqlx::query(
            r#"
            UPDATE listings SET
                amount = $1, price = $2, status = $3, payment_methods = $4,
                description = $5, terms = $6, version = version + 1, updated_at = $7
            WHERE id = $8 AND version = $9
            "#,
        )
        .bind(listing.amount)
        .bind(listing.price)
        .bind(listing.status.as_str())
        .bind(encode_json(&listing.payment_methods)?)
        .bind(&listing.description)
        .bind(&listing.terms)
        .bind(listing.updated_at)
        .bind(listing.id)
        .bind(listing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(classify_update_miss(&self.pool, "listings", "listing", listing.id).await);
        }
        let mut updated = listing.clone();
        updated.version += 1;
        Ok(updated)
    }

    async fn delete_listing(&self, id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_listings(&self, filter: &SearchListingsQuery) -> ApiResult<Vec<Listing>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM listings WHERE 1=1");
        if let Some(listing_type) = filter.listing_type {
            builder.push(" AND listing_type = ");
            builder.push_bind(listing_type.as_str());
        }
        if let Some(crypto) = &filter.cryptocurrency {
            builder.push(" AND cryptocurrency = ");
            builder.push_bind(crypto);
        }
        if let Some(fiat) = &filter.fiat_currency {
            builder.push(" AND fiat_currency = ");
            builder.push_bind(fiat);
        }
        if let Some(min_trust) = filter.min_trust_score {
            builder.push(" AND user_trust_score >= ");
            builder.push_bind(min_trust);
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;
        let mut listings: Vec<Listing> = rows
            .into_iter()
            .map(ListingRow::into_listing)
            .collect::<ApiResult<_>>()?;
        // Payment methods live in a JSON column; filter after decoding.
        if let Some(method) = &filter.payment_method {
            listings.retain(|l| l.payment_methods.iter().any(|pm| pm == method));
        }
        Ok(listings)
    }
}
