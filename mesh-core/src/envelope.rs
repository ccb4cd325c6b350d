//! JSON response envelopes
//!
//! Every HTTP and WebSocket payload uses one of these two shapes.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Successful operation envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Always `true`
    pub success: bool,
    /// Current payment status string (e.g. `PROCESSING`, `SUCCESS`)
    pub status: String,
    /// Payment id, when the operation concerns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Operation-specific payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SuccessResponse {
    /// Build a success envelope.
    pub fn new(status: impl Into<String>, payment_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            status: status.into(),
            payment_id: Some(payment_id.into()),
            data: Some(data),
        }
    }
}

/// Failed operation envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// Canonical error code
    pub error_code: ErrorCode,
    /// Human-readable summary
    pub message: String,
    /// Payment status at the time of the error, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Extra context for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Build an error envelope.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: code,
            message: message.into(),
            status: None,
            details: None,
        }
    }

    /// Attach the payment status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Attach details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let resp = SuccessResponse::new("PROCESSING", "pay_123", serde_json::json!({"message": "started"}));
        let v: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["status"], "PROCESSING");
        assert_eq!(v["payment_id"], "pay_123");
        assert_eq!(v["data"]["message"], "started");
    }

    #[test]
    fn error_envelope_omits_empty_fields() {
        let resp = ErrorResponse::new(ErrorCode::InvalidRequest, "bad body");
        let v: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error_code"], "INVALID_REQUEST");
        assert!(v.get("status").is_none());
        assert!(v.get("details").is_none());
    }
}
