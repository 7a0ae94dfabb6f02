//! HTTP error mapping.

use crate::router::SendError;
use crate::session::AuthError;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use confer_ledger::LedgerError;
use confer_messages::MessageError;
use thiserror::Error;

/// Error returned by every HTTP handler.
///
/// Rendered as `{"error": <kind>, "message": <text>}` with the status from
/// [`ApiError::status`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("a user cannot form a relationship with themselves")]
    SelfReference,
    #[error("{0}")]
    Ownership(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    ResourceClosed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Delivery(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Authorization(_) => "authorization",
            Self::SelfReference => "self_reference",
            Self::Ownership(_) => "ownership",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::ResourceClosed(_) => "resource_closed",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Delivery(_) => "delivery",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) | Self::Ownership(_) => StatusCode::FORBIDDEN,
            Self::SelfReference | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::InvalidTransition(_) | Self::ResourceClosed(_) => {
                StatusCode::CONFLICT
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Delivery(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Authorization(msg) => Self::Authorization(msg),
            LedgerError::SelfReference => Self::SelfReference,
            e @ LedgerError::Ownership(_) => Self::Ownership(e.to_string()),
            LedgerError::Conflict(msg) => Self::Conflict(msg),
            LedgerError::NotFound(what) => Self::NotFound(what),
            e @ LedgerError::ResourceClosed(_) => Self::ResourceClosed(e.to_string()),
            e @ LedgerError::InvalidTransition { .. } => Self::InvalidTransition(e.to_string()),
            LedgerError::Validation(msg) => Self::Validation(msg),
            LedgerError::Database(e) => Self::Internal(format!("database error: {e}")),
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::Validation(msg) => Self::Validation(msg),
            MessageError::NotFound(id) => Self::NotFound(format!("message {id}")),
            MessageError::Database(e) => Self::Internal(format!("database error: {e}")),
        }
    }
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotRegistered => Self::Authentication(e.to_string()),
            SendError::Validation(msg) => Self::Validation(msg),
            SendError::Authorization(msg) => Self::Authorization(msg),
            SendError::Delivery(_) => Self::Delivery(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Authentication(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Validation(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Validation(e.body_text())
    }
}
