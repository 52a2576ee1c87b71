//! Typed error taxonomy shared by services, stores and handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::{ApiResponse, TradeStatus};

pub type ApiResult<T> = Result<T, ApiError>;

/// Every expected failure mode of the core operations. Handlers map these to
/// HTTP statuses; the message always names the state the entity is actually
/// in so callers can resynchronize instead of retrying blindly.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: TradeStatus, to: TradeStatus },

    #[error("{entity} {id} is '{actual}'; operation requires {required}")]
    InvalidState {
        entity: &'static str,
        id: String,
        actual: String,
        required: &'static str,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} was modified concurrently; re-read and retry")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ApiError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        actual: impl ToString,
        required: &'static str,
    ) -> Self {
        ApiError::InvalidState {
            entity,
            id: id.to_string(),
            actual: actual.to_string(),
            required,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition { .. }
            | ApiError::InvalidState { .. }
            | ApiError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiResponse::<()>::err(self.to_string()))).into_response()
    }
}
