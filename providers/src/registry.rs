//! Provider registry
//!
//! Owns every registered payment and compliance provider together with its
//! breaker and metrics. Eligibility filtering happens here; strategy-driven
//! choice among the eligible happens in [`crate::selector`].

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::connector::{ComplianceProvider, Provider};
use crate::error::{Error, Result};
use crate::metrics::ProviderMetrics;
use crate::scoring::ScoringConfig;
use mesh_core::{ComplianceCheckRequest, ComplianceCheckResponse, ComplianceCheckType, PaymentRequest};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Provider selection priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPriority {
    /// Preferred tier
    Primary,
    /// First fallback tier
    Secondary,
    /// Last-resort tier
    Tertiary,
}

/// SLA hints used when no traffic has been observed yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Maximum acceptable P95 latency in milliseconds
    pub max_latency_p95_ms: u64,
    /// Minimum acceptable success rate (0.0-1.0)
    pub min_success_rate: f64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            max_latency_p95_ms: 500,
            min_success_rate: 0.95,
        }
    }
}

/// Registration input for a payment provider.
pub struct ProviderSpec {
    /// The adapter
    pub provider: Arc<dyn Provider>,
    /// Whether the provider starts enabled
    pub enabled: bool,
    /// Priority tier
    pub priority: ProviderPriority,
    /// SLA hints
    pub sla: SlaConfig,
    /// Breaker configuration; defaults when absent
    pub breaker_config: Option<CircuitBreakerConfig>,
}

/// A payment provider plus its operational state.
pub struct RegisteredProvider {
    /// The adapter
    pub provider: Arc<dyn Provider>,
    /// Priority tier
    pub priority: ProviderPriority,
    /// SLA hints
    pub sla: SlaConfig,
    /// Owning circuit breaker
    pub breaker: Arc<CircuitBreaker>,
    /// Owning metrics
    pub metrics: Arc<ProviderMetrics>,
    enabled: AtomicBool,
    order: usize,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("provider", &self.provider.name())
            .field("priority", &self.priority)
            .field("sla", &self.sla)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("order", &self.order)
            .finish()
    }
}

impl RegisteredProvider {
    /// Provider name.
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Whether the provider is currently selectable at all.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

struct ComplianceEntry {
    provider: Arc<dyn ComplianceProvider>,
    enabled: AtomicBool,
}

/// Process-wide registry of payment and compliance providers.
#[derive(Default)]
pub struct ProviderRegistry {
    payment: RwLock<Vec<Arc<RegisteredProvider>>>,
    compliance: RwLock<Vec<Arc<ComplianceEntry>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payment provider. Rejects empty and duplicate names;
    /// creates a default breaker when the spec carries none.
    pub fn register_payment_provider(&self, spec: ProviderSpec) -> Result<()> {
        let name = spec.provider.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidConfig("provider name cannot be empty".into()));
        }

        let mut payment = self.payment.write().expect("registry poisoned");
        if payment.iter().any(|p| p.name() == name) {
            return Err(Error::InvalidConfig(format!(
                "provider '{name}' is already registered"
            )));
        }

        let breaker = Arc::new(CircuitBreaker::new(
            &name,
            spec.breaker_config.unwrap_or_default(),
        ));
        let metrics = Arc::new(ProviderMetrics::new(&name));
        let order = payment.len();

        payment.push(Arc::new(RegisteredProvider {
            provider: spec.provider,
            priority: spec.priority,
            sla: spec.sla,
            breaker,
            metrics,
            enabled: AtomicBool::new(spec.enabled),
            order,
        }));

        info!(provider = %name, priority = ?spec.priority, enabled = spec.enabled, "registered payment provider");
        Ok(())
    }

    /// Register a compliance provider.
    pub fn register_compliance_provider(
        &self,
        provider: Arc<dyn ComplianceProvider>,
        enabled: bool,
    ) -> Result<()> {
        let name = provider.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidConfig(
                "compliance provider name cannot be empty".into(),
            ));
        }

        let mut compliance = self.compliance.write().expect("registry poisoned");
        if compliance.iter().any(|c| c.provider.name() == name) {
            return Err(Error::InvalidConfig(format!(
                "compliance provider '{name}' is already registered"
            )));
        }

        compliance.push(Arc::new(ComplianceEntry {
            provider,
            enabled: AtomicBool::new(enabled),
        }));

        info!(provider = %name, enabled, "registered compliance provider");
        Ok(())
    }

    /// Look up an enabled payment provider by name.
    pub fn payment_provider(&self, name: &str) -> Result<Arc<RegisteredProvider>> {
        let payment = self.payment.read().expect("registry poisoned");
        let entry = payment
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        if !entry.enabled() {
            return Err(Error::ProviderDisabled(name.to_string()));
        }
        Ok(entry)
    }

    /// Every registered payment provider, in insertion order.
    pub fn all_payment_providers(&self) -> Vec<Arc<RegisteredProvider>> {
        self.payment.read().expect("registry poisoned").clone()
    }

    /// Providers able to serve this request: enabled, breaker not OPEN, and
    /// the amount/currency inside the capability envelope. Stable-sorted by
    /// priority, primary first.
    pub fn eligible_payment_providers(
        &self,
        req: &PaymentRequest,
    ) -> Result<Vec<Arc<RegisteredProvider>>> {
        let payment = self.payment.read().expect("registry poisoned");

        let mut eligible: Vec<Arc<RegisteredProvider>> = payment
            .iter()
            .filter(|entry| {
                if !entry.enabled() {
                    return false;
                }
                if entry.breaker.state() == CircuitState::Open {
                    debug!(provider = %entry.name(), "skipping: circuit breaker is OPEN");
                    return false;
                }
                let caps = entry.provider.capabilities();
                if !caps.accepts_amount(req.amount) {
                    debug!(
                        provider = %entry.name(),
                        amount = req.amount,
                        "skipping: amount outside capability envelope"
                    );
                    return false;
                }
                if !caps.accepts_currency(&req.currency) {
                    debug!(provider = %entry.name(), currency = %req.currency, "skipping: currency not supported");
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        if eligible.is_empty() {
            return Err(Error::NoEligibleProviders);
        }

        eligible.sort_by_key(|p| (p.priority, p.order));
        Ok(eligible)
    }

    /// Enable a payment provider.
    pub fn enable_provider(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    /// Disable a payment provider.
    pub fn disable_provider(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let payment = self.payment.read().expect("registry poisoned");
        let entry = payment
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        entry.enabled.store(enabled, Ordering::Relaxed);
        info!(provider = %name, enabled, "provider availability changed");
        Ok(())
    }

    /// Reset a provider's circuit breaker to CLOSED.
    pub fn reset_breaker(&self, name: &str) -> Result<()> {
        let payment = self.payment.read().expect("registry poisoned");
        let entry = payment
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        entry.breaker.reset();
        Ok(())
    }

    /// Run a compliance check against the first enabled compliance provider.
    pub async fn perform_compliance_check(
        &self,
        req: &ComplianceCheckRequest,
    ) -> Result<ComplianceCheckResponse> {
        let provider = {
            let compliance = self.compliance.read().expect("registry poisoned");
            compliance
                .iter()
                .find(|c| c.enabled.load(Ordering::Relaxed))
                .map(|c| c.provider.clone())
        };

        let provider = provider.ok_or(Error::NoComplianceProvider)?;
        match req.check_type {
            ComplianceCheckType::Kyc => provider.check_kyc(req).await,
            ComplianceCheckType::Aml => provider.check_aml(req).await,
        }
    }

    /// Number of providers with an OPEN breaker.
    pub fn open_breaker_count(&self) -> usize {
        self.payment
            .read()
            .expect("registry poisoned")
            .iter()
            .filter(|p| p.breaker.state() == CircuitState::Open)
            .count()
    }

    /// Number of enabled providers with a non-OPEN breaker.
    pub fn healthy_provider_count(&self) -> usize {
        self.payment
            .read()
            .expect("registry poisoned")
            .iter()
            .filter(|p| p.enabled() && p.breaker.state() != CircuitState::Open)
            .count()
    }

    /// Full status dump for the metrics endpoint.
    pub fn status_dump(&self) -> serde_json::Value {
        let payment = self.payment.read().expect("registry poisoned");
        let payment_status: Vec<serde_json::Value> = payment
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.name(),
                    "enabled": entry.enabled(),
                    "priority": entry.priority,
                    "sla": entry.sla,
                    "circuit_breaker": entry.breaker.stats(),
                    "capabilities": entry.provider.capabilities(),
                    "metrics": entry.metrics.summary(),
                })
            })
            .collect();
        drop(payment);

        let compliance = self.compliance.read().expect("registry poisoned");
        let compliance_status: Vec<serde_json::Value> = compliance
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.provider.name(),
                    "enabled": entry.enabled.load(Ordering::Relaxed),
                })
            })
            .collect();

        serde_json::json!({
            "payment_providers": payment_status,
            "compliance_providers": compliance_status,
        })
    }

    /// Start the periodic scoring task across all payment providers.
    ///
    /// Scores drift only on this cadence; request handling never recomputes
    /// them inline.
    pub fn spawn_score_updater(self: &Arc<Self>, config: ScoringConfig) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.score_update_period);
            info!(period = ?config.score_update_period, "score updater started");
            loop {
                interval.tick().await;
                for entry in registry.all_payment_providers() {
                    let old = entry.metrics.score();
                    let new = entry.metrics.recompute_score(&config);
                    if (old - new).abs() > f64::EPSILON {
                        debug!(provider = %entry.name(), old, new, "score changed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HttpGatewayProvider;
    use mesh_core::PaymentRequest;

    fn request(amount: i64, currency: &str) -> PaymentRequest {
        PaymentRequest {
            id: "o1".into(),
            amount,
            currency: currency.into(),
            description: None,
            metadata: None,
            idempotency_key: "pay_x".into(),
            user_id: None,
            email: None,
        }
    }

    fn registry_with_gateways() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry
            .register_payment_provider(ProviderSpec {
                provider: Arc::new(HttpGatewayProvider::stripe("http://localhost:1/stripe").unwrap()),
                enabled: true,
                priority: ProviderPriority::Primary,
                sla: SlaConfig::default(),
                breaker_config: None,
            })
            .unwrap();
        registry
            .register_payment_provider(ProviderSpec {
                provider: Arc::new(HttpGatewayProvider::razorpay("http://localhost:1/razorpay").unwrap()),
                enabled: true,
                priority: ProviderPriority::Secondary,
                sla: SlaConfig::default(),
                breaker_config: None,
            })
            .unwrap();
        registry
            .register_payment_provider(ProviderSpec {
                provider: Arc::new(HttpGatewayProvider::klarna("http://localhost:1/klarna").unwrap()),
                enabled: true,
                priority: ProviderPriority::Tertiary,
                sla: SlaConfig::default(),
                breaker_config: None,
            })
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = registry_with_gateways();
        let err = registry
            .register_payment_provider(ProviderSpec {
                provider: Arc::new(HttpGatewayProvider::stripe("http://localhost:1/other").unwrap()),
                enabled: true,
                priority: ProviderPriority::Primary,
                sla: SlaConfig::default(),
                breaker_config: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn eligibility_filters_currency_and_sorts_by_priority() {
        let registry = registry_with_gateways();

        // USD at $50.00: stripe and klarna qualify, razorpay is INR-only
        let eligible = registry.eligible_payment_providers(&request(5000, "USD")).unwrap();
        let names: Vec<&str> = eligible.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["stripe", "klarna"]);

        // INR routes to stripe (primary) then razorpay
        let eligible = registry.eligible_payment_providers(&request(5000, "INR")).unwrap();
        let names: Vec<&str> = eligible.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["stripe", "razorpay"]);
    }

    #[test]
    fn eligibility_honors_amount_boundaries() {
        let registry = registry_with_gateways();

        // klarna min is 1000; at exactly 1000 it qualifies
        let eligible = registry.eligible_payment_providers(&request(1000, "USD")).unwrap();
        assert!(eligible.iter().any(|p| p.name() == "klarna"));

        // one unit below, it does not
        let eligible = registry.eligible_payment_providers(&request(999, "USD")).unwrap();
        assert!(!eligible.iter().any(|p| p.name() == "klarna"));

        // klarna max is 1_000_000; one unit above drops it
        let eligible = registry.eligible_payment_providers(&request(1_000_001, "USD")).unwrap();
        assert!(!eligible.iter().any(|p| p.name() == "klarna"));
    }

    #[test]
    fn disabled_provider_is_never_eligible() {
        let registry = registry_with_gateways();
        registry.disable_provider("stripe").unwrap();

        let eligible = registry.eligible_payment_providers(&request(5000, "USD")).unwrap();
        assert!(!eligible.iter().any(|p| p.name() == "stripe"));
        assert!(matches!(
            registry.payment_provider("stripe"),
            Err(Error::ProviderDisabled(_))
        ));

        registry.enable_provider("stripe").unwrap();
        assert!(registry.payment_provider("stripe").is_ok());
    }

    #[test]
    fn open_breaker_excludes_provider() {
        let registry = registry_with_gateways();
        let stripe = registry.payment_provider("stripe").unwrap();
        for _ in 0..10 {
            stripe.breaker.after_request(false, Some("503"));
        }
        assert_eq!(stripe.breaker.state(), CircuitState::Open);
        assert_eq!(registry.open_breaker_count(), 1);

        let eligible = registry.eligible_payment_providers(&request(5000, "USD")).unwrap();
        assert!(!eligible.iter().any(|p| p.name() == "stripe"));

        registry.reset_breaker("stripe").unwrap();
        assert_eq!(registry.open_breaker_count(), 0);
    }

    #[test]
    fn no_eligible_providers_fails_fast() {
        let registry = registry_with_gateways();
        let err = registry
            .eligible_payment_providers(&request(5000, "JPY"))
            .unwrap_err();
        assert!(matches!(err, Error::NoEligibleProviders));
    }

    #[test]
    fn unknown_provider_lookup_fails() {
        let registry = registry_with_gateways();
        assert!(matches!(
            registry.payment_provider("adyen"),
            Err(Error::ProviderNotFound(_))
        ));
    }
}
