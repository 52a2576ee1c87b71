use axum::{
    extract::{Query, State},
    Json,
};

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{ApiResponse, ConvertQuery, ConvertResponse};

/// Fiat-to-crypto conversion at the current rate.
pub async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> ApiResult<Json<ApiResponse<ConvertResponse>>> {
    if query.fiat_amount <= 0.0 {
        return Err(ApiError::Validation(
            "fiat_amount must be positive".to_string(),
        ));
    }
    let rate = state
        .rates
        .rate(&query.cryptocurrency, &query.fiat_currency)
        .await?;
    Ok(Json(ApiResponse::ok(ConvertResponse {
        crypto_amount: query.fiat_amount / rate,
        rate,
    })))
}
