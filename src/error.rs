use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("missing identity: {0}")]
    MissingIdentity(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflicting transition: expected {expected}, found {actual}")]
    ConflictingTransition {
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("invalid location sample: {0}")]
    InvalidSample(String),

    #[error("order {0} is not trackable")]
    OrderNotTrackable(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::InvalidSample(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::ConflictingTransition { .. } => StatusCode::CONFLICT,
            AppError::MissingIdentity(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Forbidden(_) | AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::OrderNotTrackable(_) => StatusCode::GONE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
