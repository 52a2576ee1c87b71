use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::error::ApiResult;
use crate::models::{
    ApiResponse, CreateListingRequest, Listing, SearchListingsQuery, UpdateListingRequest,
};

pub async fn create_listing(
    State(state): State<AppState>,
    Json(payload): Json<CreateListingRequest>,
) -> ApiResult<Json<ApiResponse<Listing>>> {
    payload.validate()?;
    let listing = state.listings.create(payload).await?;
    Ok(Json(ApiResponse::ok(listing)))
}

pub async fn search_listings(
    State(state): State<AppState>,
    Query(query): Query<SearchListingsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Listing>>>> {
    let listings = state.listings.search(&query).await?;
    Ok(Json(ApiResponse::ok(listings)))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Listing>>> {
    let listing = state.listings.get(id).await?;
    Ok(Json(ApiResponse::ok(listing)))
}

pub async fn update_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateListingRequest>,
) -> ApiResult<Json<ApiResponse<Listing>>> {
    payload.validate()?;
    let listing = state.listings.update(id, payload).await?;
    Ok(Json(ApiResponse::ok(listing)))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.listings.delete(id).await?;
    Ok(Json(ApiResponse::ok(())))
}
