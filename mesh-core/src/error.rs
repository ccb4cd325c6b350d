//! Canonical error taxonomy
//!
//! Every failure that crosses a component boundary is normalized to an
//! [`ErrorCode`]. The dispatcher and retry policy act on the
//! [`ErrorClass`] derived from the code, never on provider-specific
//! error strings.

use serde::{Deserialize, Serialize};

/// Wire-level canonical error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or unprocessable request
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    /// Charge submitted without a payment id
    #[serde(rename = "PAYMENT_ID_REQUIRED")]
    PaymentIdRequired,
    /// No intent registered for the (caller, amount) pair
    #[serde(rename = "PAYMENT_KEY_NOT_FOUND")]
    PaymentKeyNotFound,
    /// Supplied payment id does not match the registered intent
    #[serde(rename = "PAYMENT_ID_MISMATCH")]
    PaymentIdMismatch,
    /// Account cannot cover the amount
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    /// Issuer declined the card
    #[serde(rename = "CARD_DECLINED")]
    CardDeclined,
    /// Provider rejected our credentials
    #[serde(rename = "AUTHENTICATION_FAILED")]
    AuthenticationFailed,

    /// Every registered provider is unhealthy
    #[serde(rename = "NO_HEALTHY_SERVERS")]
    NoHealthyServers,
    /// No provider passed eligibility filtering for this request
    #[serde(rename = "NO_ELIGIBLE_PROVIDERS")]
    NoEligibleProviders,
    /// Upstream gateway returned 502
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    /// Upstream gateway returned 504
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,
    /// Provider-side 5xx failure
    #[serde(rename = "PROVIDER_ERROR")]
    ProviderError,
    /// Provider deadline expired
    #[serde(rename = "PROVIDER_TIMEOUT")]
    ProviderTimeout,
    /// Provider answered but is degraded
    #[serde(rename = "PROVIDER_DEGRADED")]
    ProviderDegraded,
    /// Provider rate limit hit (429)
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    /// Provider returned 503 or refused the connection
    #[serde(rename = "PROVIDER_DOWN")]
    ProviderDown,

    /// Peer reset the connection
    #[serde(rename = "CONNECTION_RESET")]
    ConnectionReset,
    /// Connect or request timeout at the transport layer
    #[serde(rename = "CONNECTION_TIMEOUT")]
    ConnectionTimeout,
    /// Generic network failure
    #[serde(rename = "NETWORK_ERROR")]
    NetworkError,
    /// Name resolution failed
    #[serde(rename = "DNS_ERROR")]
    DnsError,
    /// Deadline exceeded inside the mesh
    #[serde(rename = "TIMEOUT")]
    Timeout,

    /// Provider response could not be decoded
    #[serde(rename = "MALFORMED_RESPONSE")]
    MalformedResponse,

    /// Unexpected internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    /// Request rejected by an open circuit breaker
    #[serde(rename = "CIRCUIT_OPEN")]
    CircuitOpen,

    /// Compliance provider rejected the check
    #[serde(rename = "COMPLIANCE_FAILED")]
    ComplianceFailed,
    /// KYC verification required before the charge can proceed
    #[serde(rename = "KYC_REQUIRED")]
    KycRequired,
}

impl ErrorCode {
    /// The wire identifier for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::PaymentIdRequired => "PAYMENT_ID_REQUIRED",
            ErrorCode::PaymentKeyNotFound => "PAYMENT_KEY_NOT_FOUND",
            ErrorCode::PaymentIdMismatch => "PAYMENT_ID_MISMATCH",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::CardDeclined => "CARD_DECLINED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::NoHealthyServers => "NO_HEALTHY_SERVERS",
            ErrorCode::NoEligibleProviders => "NO_ELIGIBLE_PROVIDERS",
            ErrorCode::GatewayUnavailable => "GATEWAY_UNAVAILABLE",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorCode::ProviderDegraded => "PROVIDER_DEGRADED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ProviderDown => "PROVIDER_DOWN",
            ErrorCode::ConnectionReset => "CONNECTION_RESET",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::DnsError => "DNS_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ComplianceFailed => "COMPLIANCE_FAILED",
            ErrorCode::KycRequired => "KYC_REQUIRED",
        }
    }

    /// Retry classification for this code.
    pub fn classify(&self) -> ErrorClass {
        match self {
            ErrorCode::RateLimited
            | ErrorCode::ProviderError
            | ErrorCode::ProviderTimeout
            | ErrorCode::ProviderDown
            | ErrorCode::GatewayUnavailable
            | ErrorCode::GatewayTimeout
            | ErrorCode::ConnectionReset
            | ErrorCode::ConnectionTimeout
            | ErrorCode::NetworkError
            | ErrorCode::DnsError
            | ErrorCode::Timeout
            | ErrorCode::MalformedResponse => ErrorClass::Retryable,

            ErrorCode::InvalidRequest
            | ErrorCode::PaymentIdRequired
            | ErrorCode::PaymentKeyNotFound
            | ErrorCode::PaymentIdMismatch
            | ErrorCode::InsufficientFunds
            | ErrorCode::CardDeclined
            | ErrorCode::AuthenticationFailed
            | ErrorCode::ComplianceFailed
            | ErrorCode::KycRequired => ErrorClass::ClientSide,

            ErrorCode::ProviderDegraded => ErrorClass::Degraded,

            ErrorCode::NoHealthyServers
            | ErrorCode::NoEligibleProviders
            | ErrorCode::InternalError
            | ErrorCode::CircuitOpen => ErrorClass::Fatal,
        }
    }

    /// Whether the retry policy may attempt this outcome again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable | ErrorClass::Degraded)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry behavior classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Transient; the dispatcher may retry with backoff
    Retryable,
    /// Permanent for this request; surfaced to the caller
    Fatal,
    /// Provider still serving but impaired; retried and penalized in scoring
    Degraded,
    /// Caused by the caller; never retried
    ClientSide,
}
