use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::error::ApiResult;
use crate::models::{
    ApiResponse, CreateTradeRequest, ListTradesQuery, SendMessageRequest, Trade, TradeMessage,
    TransitionResponse, TransitionTradeRequest, VerifyEscrowResponse,
};

pub async fn create_trade(
    State(state): State<AppState>,
    Json(payload): Json<CreateTradeRequest>,
) -> ApiResult<Json<ApiResponse<Trade>>> {
    payload.validate()?;
    let trade = state.trades.create_trade(payload).await?;
    Ok(Json(ApiResponse::ok(trade)))
}

pub async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<ListTradesQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Trade>>>> {
    let trades = state
        .trades
        .list(query.party_id.as_deref(), query.status)
        .await?;
    Ok(Json(ApiResponse::ok(trades)))
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Trade>>> {
    let trade = state.trades.get(id).await?;
    Ok(Json(ApiResponse::ok(trade)))
}

pub async fn transition_trade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionTradeRequest>,
) -> ApiResult<Json<ApiResponse<TransitionResponse>>> {
    let outcome = state
        .trades
        .transition_trade(id, payload.status, payload.requested_by.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

pub async fn verify_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<VerifyEscrowResponse>>> {
    let outcome = state.trades.verify_escrow(id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> ApiResult<Json<ApiResponse<TradeMessage>>> {
    payload.validate()?;
    let message = state.trades.send_message(id, payload).await?;
    Ok(Json(ApiResponse::ok(message)))
}
