//! HTTP gateway adapters
//!
//! One adapter fronts one upstream payment gateway. Capability envelopes are
//! enforced locally before any network call; upstream HTTP statuses and
//! response bodies are normalized to canonical error codes.

use crate::connector::{ComplianceProvider, Provider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use mesh_core::{
    retry::parse_retry_after, BnplRequest, BnplResponse, ComplianceCheckRequest,
    ComplianceCheckResponse, ComplianceCheckType, ComplianceStatus, ErrorCode, PaymentRequest,
    PaymentResponse, PaymentStatus, ProviderCapabilities, ProviderHealth, RefundRequest,
    RefundResponse,
};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Gateway adapter configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Stable provider name (registry key)
    pub name: String,
    /// Upstream charge endpoint base URL
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Capability envelope enforced before dispatch
    pub capabilities: ProviderCapabilities,
}

/// HTTP-backed payment provider adapter.
pub struct HttpGatewayProvider {
    config: GatewayConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GatewayChargeBody {
    status: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<ErrorCode>,
}

impl HttpGatewayProvider {
    /// Create an adapter from explicit configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Stripe-shaped gateway: broad currency support, wide amount envelope.
    pub fn stripe(base_url: impl Into<String>) -> Result<Self> {
        Self::new(GatewayConfig {
            name: "stripe".to_string(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECONDS),
            capabilities: ProviderCapabilities {
                supports_refunds: true,
                supports_bnpl: false,
                compliance_ready: true,
                max_amount_cents: 99_999_999,
                min_amount_cents: 50,
                supported_currencies: vec!["USD".into(), "EUR".into(), "GBP".into(), "INR".into()],
                supported_regions: vec!["US".into(), "EU".into(), "IN".into()],
            },
        })
    }

    /// Razorpay-shaped gateway: INR only.
    pub fn razorpay(base_url: impl Into<String>) -> Result<Self> {
        Self::new(GatewayConfig {
            name: "razorpay".to_string(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECONDS),
            capabilities: ProviderCapabilities {
                supports_refunds: true,
                supports_bnpl: false,
                compliance_ready: true,
                max_amount_cents: 10_000_000,
                min_amount_cents: 100,
                supported_currencies: vec!["INR".into()],
                supported_regions: vec!["IN".into()],
            },
        })
    }

    /// Klarna-shaped BNPL gateway.
    pub fn klarna(base_url: impl Into<String>) -> Result<Self> {
        Self::new(GatewayConfig {
            name: "klarna".to_string(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECONDS),
            capabilities: ProviderCapabilities {
                supports_refunds: true,
                supports_bnpl: true,
                compliance_ready: false,
                max_amount_cents: 1_000_000,
                min_amount_cents: 1000,
                supported_currencies: vec!["USD".into(), "EUR".into(), "GBP".into(), "SEK".into()],
                supported_regions: vec!["US".into(), "EU".into()],
            },
        })
    }

    fn validate_envelope(&self, amount: i64, currency: &str) -> Result<()> {
        let caps = &self.config.capabilities;
        if amount < caps.min_amount_cents {
            return Err(Error::provider(
                ErrorCode::InvalidRequest,
                "amount_too_small",
                format!("amount must be at least {} cents", caps.min_amount_cents),
            ));
        }
        if amount > caps.max_amount_cents {
            return Err(Error::provider(
                ErrorCode::InvalidRequest,
                "amount_too_large",
                format!("amount must not exceed {} cents", caps.max_amount_cents),
            ));
        }
        if !caps.accepts_currency(currency) {
            return Err(Error::provider(
                ErrorCode::InvalidRequest,
                "currency_not_supported",
                format!("currency {currency} is not supported by this provider"),
            ));
        }
        Ok(())
    }
}

/// Map a non-2xx upstream HTTP status to a canonical code.
fn map_http_status(status: u16) -> ErrorCode {
    match status {
        408 => ErrorCode::ConnectionTimeout,
        429 => ErrorCode::RateLimited,
        400 => ErrorCode::InvalidRequest,
        401 | 403 => ErrorCode::AuthenticationFailed,
        402 => ErrorCode::InsufficientFunds,
        404..=499 => ErrorCode::CardDeclined,
        500 => ErrorCode::ProviderError,
        502 => ErrorCode::GatewayUnavailable,
        503 => ErrorCode::ProviderDown,
        504 => ErrorCode::GatewayTimeout,
        _ => ErrorCode::ProviderError,
    }
}

#[async_trait]
impl Provider for HttpGatewayProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn charge(&self, req: &PaymentRequest) -> Result<PaymentResponse> {
        self.validate_envelope(req.amount, &req.currency)?;

        debug!(provider = %self.config.name, payment_id = %req.idempotency_key, "dispatching charge");
        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.base_url)
            .header("Idempotency-Key", &req.idempotency_key)
            .json(&serde_json::json!({
                "id": req.id,
                "amount": req.amount,
                "currency": req.currency,
            }))
            .send()
            .await?;
        let latency = start.elapsed();

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                code: map_http_status(status),
                provider_code: status.to_string(),
                message: body,
                retry_after,
            });
        }

        let body: GatewayChargeBody = response.json().await.map_err(|e| {
            Error::provider(ErrorCode::MalformedResponse, "invalid_json", e.to_string())
        })?;

        if body.status == "success" {
            info!(
                provider = %self.config.name,
                payment_id = %req.idempotency_key,
                latency_ms = latency.as_millis() as i64,
                "charge succeeded"
            );
            Ok(PaymentResponse {
                payment_id: req.idempotency_key.clone(),
                status: PaymentStatus::Success,
                provider_txn_id: body.transaction_id,
                provider: self.config.name.clone(),
                latency_ms: latency.as_millis() as i64,
                processed_at: Utc::now(),
                error_code: None,
                error_message: None,
            })
        } else {
            // application-level decline from the gateway
            let code = body.error_code.unwrap_or(ErrorCode::CardDeclined);
            Err(Error::provider(
                code,
                body.status,
                body.error.unwrap_or_else(|| "charge declined".to_string()),
            ))
        }
    }

    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse> {
        if !self.config.capabilities.supports_refunds {
            return Err(Error::provider(
                ErrorCode::InvalidRequest,
                "refunds_not_supported",
                "this provider does not support refunds",
            ));
        }

        let response = self
            .client
            .post(format!("{}/refund", self.config.base_url))
            .header("Idempotency-Key", &req.idempotency_key)
            .json(req)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                code: map_http_status(status),
                provider_code: status.to_string(),
                message: body,
                retry_after: None,
            });
        }

        #[derive(Deserialize)]
        struct RefundBody {
            refund_id: String,
            status: String,
        }
        let body: RefundBody = response.json().await.map_err(|e| {
            Error::provider(ErrorCode::MalformedResponse, "invalid_json", e.to_string())
        })?;

        Ok(RefundResponse {
            refund_id: body.refund_id,
            status: body.status,
            provider: self.config.name.clone(),
            processed_at: Utc::now(),
            error_code: None,
            error_message: None,
        })
    }

    async fn create_bnpl(&self, req: &BnplRequest) -> Result<BnplResponse> {
        if !self.config.capabilities.supports_bnpl {
            return Err(Error::provider(
                ErrorCode::InvalidRequest,
                "bnpl_not_supported",
                "this provider does not support BNPL",
            ));
        }
        self.validate_envelope(req.amount, &req.currency)?;

        let response = self
            .client
            .post(format!("{}/bnpl", self.config.base_url))
            .header("Idempotency-Key", &req.idempotency_key)
            .json(req)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                code: map_http_status(status),
                provider_code: status.to_string(),
                message: body,
                retry_after: None,
            });
        }

        #[derive(Deserialize)]
        struct BnplBody {
            bnpl_id: String,
            status: String,
            #[serde(default)]
            approval_url: Option<String>,
        }
        let body: BnplBody = response.json().await.map_err(|e| {
            Error::provider(ErrorCode::MalformedResponse, "invalid_json", e.to_string())
        })?;

        Ok(BnplResponse {
            bnpl_id: body.bnpl_id,
            status: body.status,
            provider: self.config.name.clone(),
            approval_url: body.approval_url,
            processed_at: Utc::now(),
        })
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        let start = Instant::now();
        let result = self
            .client
            .get(format!("{}/health", self.config.base_url))
            .send()
            .await;
        let latency = start.elapsed();

        match result {
            Ok(resp) if resp.status().is_success() => Ok(ProviderHealth {
                healthy: true,
                timestamp: Utc::now(),
                latency_ms: latency.as_millis() as i64,
                message: None,
            }),
            Ok(resp) => Ok(ProviderHealth {
                healthy: false,
                timestamp: Utc::now(),
                latency_ms: latency.as_millis() as i64,
                message: Some(format!("health endpoint returned {}", resp.status())),
            }),
            Err(e) => Ok(ProviderHealth {
                healthy: false,
                timestamp: Utc::now(),
                latency_ms: latency.as_millis() as i64,
                message: Some(e.to_string()),
            }),
        }
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.config.capabilities
    }
}

/// HTTP-backed KYC/AML provider adapter (onfido-shaped).
pub struct HttpComplianceProvider {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpComplianceProvider {
    /// Create a compliance adapter for the given endpoint.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            client,
        })
    }

    async fn run_check(
        &self,
        path: &str,
        req: &ComplianceCheckRequest,
    ) -> Result<ComplianceCheckResponse> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Idempotency-Key", &req.idempotency_key)
            .json(req)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                ErrorCode::ComplianceFailed,
                status.to_string(),
                body,
            ));
        }

        #[derive(Deserialize)]
        struct CheckBody {
            check_id: String,
            status: ComplianceStatus,
            #[serde(default)]
            risk_level: Option<String>,
        }
        let body: CheckBody = response.json().await.map_err(|e| {
            Error::provider(ErrorCode::MalformedResponse, "invalid_json", e.to_string())
        })?;

        Ok(ComplianceCheckResponse {
            check_id: body.check_id,
            status: body.status,
            risk_level: body.risk_level,
            provider: self.name.clone(),
            processed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ComplianceProvider for HttpComplianceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_kyc(&self, req: &ComplianceCheckRequest) -> Result<ComplianceCheckResponse> {
        debug_assert!(matches!(req.check_type, ComplianceCheckType::Kyc));
        self.run_check("kyc", req).await
    }

    async fn check_aml(&self, req: &ComplianceCheckRequest) -> Result<ComplianceCheckResponse> {
        debug_assert!(matches!(req.check_type, ComplianceCheckType::Aml));
        self.run_check("aml", req).await
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        let start = Instant::now();
        let healthy = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        Ok(ProviderHealth {
            healthy,
            timestamp: Utc::now(),
            latency_ms: start.elapsed().as_millis() as i64,
            message: None,
        })
    }
}
