//! Provider traits
//!
//! Every payment gateway is wrapped in an adapter implementing [`Provider`];
//! KYC/AML gateways implement [`ComplianceProvider`]. Adapters normalize
//! provider-native failures into [`crate::Error::Provider`] values carrying a
//! canonical [`mesh_core::ErrorCode`].

use crate::error::Result;
use async_trait::async_trait;
use mesh_core::{
    BnplRequest, BnplResponse, ComplianceCheckRequest, ComplianceCheckResponse, PaymentRequest,
    PaymentResponse, ProviderCapabilities, ProviderHealth, RefundRequest, RefundResponse,
};

/// Interface all payment provider adapters implement.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider identifier (registry key).
    fn name(&self) -> &str;

    /// Charge a payment.
    async fn charge(&self, req: &PaymentRequest) -> Result<PaymentResponse>;

    /// Refund a previously charged payment.
    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse>;

    /// Open a BNPL installment plan.
    async fn create_bnpl(&self, req: &BnplRequest) -> Result<BnplResponse>;

    /// Probe provider health.
    async fn health_check(&self) -> Result<ProviderHealth>;

    /// What this provider can serve.
    fn capabilities(&self) -> &ProviderCapabilities;
}

/// Interface for KYC/AML providers.
#[async_trait]
pub trait ComplianceProvider: Send + Sync {
    /// Stable provider identifier.
    fn name(&self) -> &str;

    /// Run a KYC verification.
    async fn check_kyc(&self, req: &ComplianceCheckRequest) -> Result<ComplianceCheckResponse>;

    /// Run an AML screening.
    async fn check_aml(&self, req: &ComplianceCheckRequest) -> Result<ComplianceCheckResponse>;

    /// Probe provider health.
    async fn health_check(&self) -> Result<ProviderHealth>;
}
