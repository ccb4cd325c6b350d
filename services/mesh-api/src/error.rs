//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use mesh_core::{ErrorCode, ErrorResponse};

/// API-surface error carrying the HTTP status and the canonical envelope.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to answer with
    pub status: StatusCode,
    /// Wire envelope body
    pub body: ErrorResponse,
}

impl ApiError {
    /// Build an error response.
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(code, message),
        }
    }

    /// Attach the payment status to the envelope.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.body.status = Some(state.into());
        self
    }

    /// Attach details to the envelope.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }

    /// 400 INVALID_REQUEST.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    /// 500 INTERNAL_ERROR.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
