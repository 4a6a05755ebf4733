//! Error types for the scheduling server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::order::FulfillmentStatus;

/// Numeric error codes returned to clients alongside the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BadValue = 5,
    SlotUnavailable = 6,
    OrderStateConflict = 7,
    ReservationRollbackFailure = 8,
    NotificationFailure = 9,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The ledger refused the reservation: the (date, slot) is full.
    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Order {order_id} is {status}: {message}")]
    OrderStateConflict {
        order_id: i32,
        status: FulfillmentStatus,
        message: String,
    },

    /// A compensating release failed; the hold is left for the consistency sweep.
    #[error("Reservation rollback failed: {0}")]
    ReservationRollback(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn state_conflict(order_id: i32, status: FulfillmentStatus, message: impl Into<String>) -> Self {
        AppError::OrderStateConflict {
            order_id,
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::PoolTimedOut) | AppError::Database(sqlx::Error::Io(_)) => true,
            AppError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }

    /// Unique-constraint violation raised by PostgreSQL
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
    /// Current order status, set for order state conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<FulfillmentStatus>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut current_status = None;
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone())
            }
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::SlotUnavailable(msg) => {
                (StatusCode::CONFLICT, ErrorCode::SlotUnavailable, msg.clone())
            }
            AppError::OrderStateConflict { status, message, .. } => {
                current_status = Some(*status);
                (StatusCode::CONFLICT, ErrorCode::OrderStateConflict, message.clone())
            }
            AppError::ReservationRollback(msg) => {
                tracing::error!("Reservation rollback failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::ReservationRollbackFailure,
                    "Booking could not be completed, please try again".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Notification(msg) => {
                tracing::error!("Notification error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorCode::NotificationFailure,
                    "Notification service error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
            current_status,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
