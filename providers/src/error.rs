//! Error types for the provider layer

use mesh_core::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Provider layer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Circuit breaker rejected the request
    #[error("circuit breaker is open for provider {provider}: {reason}")]
    CircuitOpen {
        /// Provider name
        provider: String,
        /// Reason, including remaining cooldown
        reason: String,
    },

    /// No provider passed eligibility filtering
    #[error("no eligible providers found for this request")]
    NoEligibleProviders,

    /// Unknown provider name
    #[error("provider '{0}' not found")]
    ProviderNotFound(String),

    /// Provider exists but is disabled
    #[error("provider '{0}' is disabled")]
    ProviderDisabled(String),

    /// No enabled compliance provider is registered
    #[error("no enabled compliance providers available")]
    NoComplianceProvider,

    /// Registration rejected
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// Normalized provider failure
    #[error("[{code}] {message} (provider_code: {provider_code})")]
    Provider {
        /// Canonical error code
        code: ErrorCode,
        /// Provider-native error identifier
        provider_code: String,
        /// Provider message
        message: String,
        /// Provider-supplied retry hint (rate limits)
        retry_after: Option<Duration>,
    },

    /// Deadline expired
    #[error("timeout after {seconds}s: {operation}")]
    Timeout {
        /// Deadline length
        seconds: u64,
        /// What timed out
        operation: String,
    },

    /// HTTP client error
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Normalized provider failure without a retry hint.
    pub fn provider(code: ErrorCode, provider_code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            code,
            provider_code: provider_code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// The canonical code this error maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Error::NoEligibleProviders => ErrorCode::NoEligibleProviders,
            Error::ProviderNotFound(_) | Error::ProviderDisabled(_) => ErrorCode::NoHealthyServers,
            Error::NoComplianceProvider => ErrorCode::ComplianceFailed,
            Error::InvalidConfig(_) => ErrorCode::InvalidRequest,
            Error::Provider { code, .. } => *code,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::Http(e) => {
                if e.is_timeout() {
                    ErrorCode::ConnectionTimeout
                } else if e.is_connect() {
                    ErrorCode::ProviderDown
                } else {
                    ErrorCode::NetworkError
                }
            }
            Error::Json(_) => ErrorCode::MalformedResponse,
        }
    }

    /// The provider's retry hint, when one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Provider { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_carries_code() {
        let err = Error::provider(ErrorCode::CardDeclined, "card_declined", "issuer said no");
        assert_eq!(err.code(), ErrorCode::CardDeclined);
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn rate_limit_hint_is_exposed() {
        let err = Error::Provider {
            code: ErrorCode::RateLimited,
            provider_code: "429".into(),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn structural_errors_map_to_canonical_codes() {
        assert_eq!(
            Error::CircuitOpen { provider: "stripe".into(), reason: "cooling".into() }.code(),
            ErrorCode::CircuitOpen
        );
        assert_eq!(Error::NoEligibleProviders.code(), ErrorCode::NoEligibleProviders);
        assert_eq!(
            Error::Timeout { seconds: 30, operation: "charge".into() }.code(),
            ErrorCode::Timeout
        );
    }
}
