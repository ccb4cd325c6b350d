//! Normalized request/response models for provider-agnostic operations

use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized payment request, as handed to a provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Caller-supplied order/reference id
    pub id: String,
    /// Amount in minor currency units
    pub amount: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque caller metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Idempotency key; for charges this is the payment id
    pub idempotency_key: String,
    /// End-user identifier, used for compliance and affinity routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// End-user email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Normalized payment response from a provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    /// Mesh payment id
    pub payment_id: String,
    /// Outcome status
    pub status: PaymentStatus,
    /// Provider-side transaction reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_txn_id: Option<String>,
    /// Provider name that served the charge
    pub provider: String,
    /// Observed provider latency
    pub latency_ms: i64,
    /// When the provider finished
    pub processed_at: DateTime<Utc>,
    /// Canonical error code, present on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Provider error message, present on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Payment outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Accepted, not yet dispatched
    Pending,
    /// Dispatch in flight
    Processing,
    /// Charged successfully
    Success,
    /// Terminally failed
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

/// Normalized refund request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Caller-supplied refund reference
    pub id: String,
    /// Payment being refunded
    pub payment_id: String,
    /// Amount in minor units
    pub amount: i64,
    /// Refund reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Idempotency key
    pub idempotency_key: String,
}

/// Normalized refund response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    /// Provider refund reference
    pub refund_id: String,
    /// Refund status string
    pub status: String,
    /// Provider that served the refund
    pub provider: String,
    /// When the provider finished
    pub processed_at: DateTime<Utc>,
    /// Canonical error code, present on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Provider error message, present on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// KYC/AML compliance check request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckRequest {
    /// End-user under check
    pub user_id: String,
    /// Which check to run
    pub check_type: ComplianceCheckType,
    /// Submitted document payload, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_data: Option<serde_json::Value>,
    /// Idempotency key (`<payment_id>_kyc` for charge-gating checks)
    pub idempotency_key: String,
}

/// Compliance check kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceCheckType {
    /// Know-your-customer verification
    Kyc,
    /// Anti-money-laundering screening
    Aml,
}

/// Compliance check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckResponse {
    /// Provider check reference
    pub check_id: String,
    /// Check outcome
    pub status: ComplianceStatus,
    /// Risk level reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    /// Provider that served the check
    pub provider: String,
    /// When the provider finished
    pub processed_at: DateTime<Utc>,
}

/// Compliance check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    /// Check passed
    Approved,
    /// Check failed
    Rejected,
    /// Still running
    Pending,
    /// Manual review needed
    ReviewRequired,
}

/// Buy-now-pay-later request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BnplRequest {
    /// Caller-supplied reference
    pub id: String,
    /// Amount in minor units
    pub amount: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Customer email, required by BNPL providers
    pub customer_email: String,
    /// Number of installments
    pub term: u32,
    /// Idempotency key
    pub idempotency_key: String,
}

/// Buy-now-pay-later response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BnplResponse {
    /// Provider BNPL reference
    pub bnpl_id: String,
    /// Plan status string
    pub status: String,
    /// Provider that served the plan
    pub provider: String,
    /// Customer approval URL, when the flow needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    /// When the provider finished
    pub processed_at: DateTime<Utc>,
}

/// What a provider can serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Refund support
    pub supports_refunds: bool,
    /// BNPL support
    pub supports_bnpl: bool,
    /// Whether the provider can gate compliance-heavy flows
    pub compliance_ready: bool,
    /// Largest chargeable amount in minor units
    pub max_amount_cents: i64,
    /// Smallest chargeable amount in minor units
    pub min_amount_cents: i64,
    /// Accepted currencies
    pub supported_currencies: Vec<String>,
    /// Accepted regions
    pub supported_regions: Vec<String>,
}

impl ProviderCapabilities {
    /// Whether an amount falls inside the chargeable envelope.
    pub fn accepts_amount(&self, amount: i64) -> bool {
        amount >= self.min_amount_cents && amount <= self.max_amount_cents
    }

    /// Whether a currency is supported.
    pub fn accepts_currency(&self, currency: &str) -> bool {
        self.supported_currencies.iter().any(|c| c == currency)
    }
}

/// Provider health probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the provider answered within expectations
    pub healthy: bool,
    /// Probe time
    pub timestamp: DateTime<Utc>,
    /// Probe latency
    pub latency_ms: i64,
    /// Optional detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ProviderCapabilities {
        ProviderCapabilities {
            supports_refunds: true,
            supports_bnpl: false,
            compliance_ready: true,
            max_amount_cents: 10_000,
            min_amount_cents: 50,
            supported_currencies: vec!["USD".into(), "EUR".into()],
            supported_regions: vec!["US".into()],
        }
    }

    #[test]
    fn amount_envelope_is_inclusive() {
        let caps = caps();
        assert!(caps.accepts_amount(50));
        assert!(caps.accepts_amount(10_000));
        assert!(!caps.accepts_amount(49));
        assert!(!caps.accepts_amount(10_001));
    }

    #[test]
    fn currency_membership() {
        let caps = caps();
        assert!(caps.accepts_currency("USD"));
        assert!(!caps.accepts_currency("INR"));
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(serde_json::to_string(&PaymentStatus::Processing).unwrap(), "\"PROCESSING\"");
        assert_eq!(serde_json::to_string(&ComplianceStatus::ReviewRequired).unwrap(), "\"REVIEW_REQUIRED\"");
        assert_eq!(serde_json::to_string(&ComplianceCheckType::Kyc).unwrap(), "\"KYC\"");
    }
}
