//! Marketplace listing CRUD and search.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    CreateListingRequest, Listing, ListingStatus, SearchListingsQuery, UpdateListingRequest,
};
use crate::store::Store;

pub struct ListingService {
    store: Arc<dyn Store>,
}

impl ListingService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateListingRequest) -> ApiResult<Listing> {
        if request.min_order > request.max_order {
            return Err(ApiError::Validation(
                "min_order must not exceed max_order".to_string(),
            ));
        }
        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            user_address: request.user_address,
            user_trust_score: request.user_trust_score,
            listing_type: request.listing_type,
            cryptocurrency: request.cryptocurrency,
            fiat_currency: request.fiat_currency,
            amount: request.amount,
            price: request.price,
            min_order: request.min_order,
            max_order: request.max_order,
            payment_methods: request.payment_methods,
            description: request.description,
            terms: request.terms,
            status: ListingStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_listing(&listing).await?;
        info!(
            listing_id = %listing.id,
            listing_type = listing.listing_type.as_str(),
            cryptocurrency = %listing.cryptocurrency,
            "listing created"
        );
        Ok(listing)
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| ApiError::not_found("listing", id))
    }

    pub async fn update(&self, id: Uuid, request: UpdateListingRequest) -> ApiResult<Listing> {
        let mut listing = self.get(id).await?;
        if let Some(amount) = request.amount {
            listing.amount = amount;
        }
        if let Some(price) = request.price {
            listing.price = price;
        }
        if let Some(status) = request.status {
            listing.status = status;
        }
        if let Some(payment_methods) = request.payment_methods {
            listing.payment_methods = payment_methods;
        }
        if let Some(description) = request.description {
            listing.description = description;
        }
        if let Some(terms) = request.terms {
            listing.terms = terms;
        }
        listing.updated_at = Utc::now();
        self.store.update_listing(&listing).await
    }

    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        if self.store.delete_listing(id).await? {
            info!(listing_id = %id, "listing deleted");
            Ok(())
        } else {
            Err(ApiError::not_found("listing", id))
        }
    }

    pub async fn search(&self, query: &SearchListingsQuery) -> ApiResult<Vec<Listing>> {
        self.store.search_listings(query).await
    }
}
