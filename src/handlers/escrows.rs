use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::error::ApiResult;
use crate::models::{
    ApiResponse, ConfirmPaymentRequest, CreateEscrowRequest, DisputeCase, EscrowContract,
    InitiateDisputeRequest, ResolveDisputeRequest,
};

pub async fn create_escrow(
    State(state): State<AppState>,
    Json(payload): Json<CreateEscrowRequest>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    payload.validate()?;
    let escrow = state.escrows.create(payload).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn get_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    let escrow = state.escrows.get(id).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn fund_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    let escrow = state.escrows.fund(id).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    let escrow = state.escrows.confirm_payment(id, payload.role).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn release_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    let escrow = state.escrows.release(id).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn cancel_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<EscrowContract>>> {
    let escrow = state.escrows.cancel(id).await?;
    Ok(Json(ApiResponse::ok(escrow)))
}

pub async fn initiate_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InitiateDisputeRequest>,
) -> ApiResult<Json<ApiResponse<DisputeCase>>> {
    payload.validate()?;
    let dispute = state.escrows.initiate_dispute(id, payload).await?;
    Ok(Json(ApiResponse::ok(dispute)))
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResolveDisputeRequest>,
) -> ApiResult<Json<ApiResponse<DisputeCase>>> {
    let dispute = state
        .escrows
        .resolve_dispute(id, payload.decision, &payload.notes)
        .await?;
    Ok(Json(ApiResponse::ok(dispute)))
}
