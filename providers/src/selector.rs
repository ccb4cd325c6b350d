//! Strategy-driven provider selection
//!
//! Operates on the registry's eligibility-filtered list. Strategies trade
//! off differently under different traffic shapes; the deployment picks one
//! via configuration.

use crate::circuit_breaker::CircuitState;
use crate::error::{Error, Result};
use crate::registry::{ProviderRegistry, RegisteredProvider};
use async_trait::async_trait;
use mesh_core::{PaymentRequest, AFFINITY_TTL_SECONDS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// First of the priority-sorted eligible list
    Priority,
    /// Lowest observed P95 latency
    LeastLatency,
    /// Highest composite health score
    HealthScore,
    /// Sticky user -> provider binding with health-score fallback
    Affinity,
    /// Deterministic spread keyed on the idempotency key
    RoundRobin,
    /// Legacy score-weighted random draw
    WeightedRandom,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "priority" => Ok(Strategy::Priority),
            "least_latency" => Ok(Strategy::LeastLatency),
            "health_score" => Ok(Strategy::HealthScore),
            "affinity" => Ok(Strategy::Affinity),
            "round_robin" => Ok(Strategy::RoundRobin),
            "weighted_random" => Ok(Strategy::WeightedRandom),
            other => Err(format!("unknown routing strategy: {other}")),
        }
    }
}

/// Storage for user -> provider affinity bindings.
#[async_trait]
pub trait AffinityStore: Send + Sync {
    /// The provider bound to this user, if any.
    async fn get(&self, user_id: &str) -> Option<String>;
    /// Bind a user to a provider for `ttl`.
    async fn set(&self, user_id: &str, provider: &str, ttl: Duration);
}

/// Chooses one eligible provider per request under the configured strategy.
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    strategy: Strategy,
    affinity: Option<Arc<dyn AffinityStore>>,
    rng: Mutex<StdRng>,
}

impl ProviderSelector {
    /// Create a selector with an entropy-seeded RNG.
    pub fn new(registry: Arc<ProviderRegistry>, strategy: Strategy) -> Self {
        Self {
            registry,
            strategy,
            affinity: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Attach an affinity store (required for [`Strategy::Affinity`]).
    pub fn with_affinity_store(mut self, store: Arc<dyn AffinityStore>) -> Self {
        self.affinity = Some(store);
        self
    }

    /// Seed the weighted-random draw (deterministic selection for tests).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The configured strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The chosen provider for this request.
    pub async fn select(&self, req: &PaymentRequest) -> Result<Arc<RegisteredProvider>> {
        self.candidates(req).await.map(|mut c| c.remove(0))
    }

    /// All eligible providers in preference order, the selected one first.
    ///
    /// The dispatcher walks this list when a breaker rejects the front
    /// choice mid-attempt.
    pub async fn candidates(&self, req: &PaymentRequest) -> Result<Vec<Arc<RegisteredProvider>>> {
        let eligible = self.registry.eligible_payment_providers(req)?;

        let chosen = match self.strategy {
            Strategy::Priority => 0,
            Strategy::LeastLatency => self.pick_least_latency(&eligible),
            Strategy::HealthScore => self.pick_health_score(&eligible),
            Strategy::Affinity => self.pick_affinity(&eligible, req).await,
            Strategy::RoundRobin => hash_string(&req.idempotency_key) as usize % eligible.len(),
            Strategy::WeightedRandom => self.pick_weighted_random(&eligible),
        };

        let mut ordered = eligible;
        let front = ordered.remove(chosen);
        ordered.insert(0, front);
        Ok(ordered)
    }

    fn pick_least_latency(&self, eligible: &[Arc<RegisteredProvider>]) -> usize {
        let mut best = 0;
        let mut best_latency = p95_ms(&eligible[0]);
        for (i, entry) in eligible.iter().enumerate().skip(1) {
            let latency = p95_ms(entry);
            if latency < best_latency {
                best = i;
                best_latency = latency;
            }
        }
        best
    }

    fn pick_health_score(&self, eligible: &[Arc<RegisteredProvider>]) -> usize {
        let mut best = 0;
        let mut best_score = composite_health_score(&eligible[0]);
        for (i, entry) in eligible.iter().enumerate().skip(1) {
            let score = composite_health_score(entry);
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        best
    }

    async fn pick_affinity(&self, eligible: &[Arc<RegisteredProvider>], req: &PaymentRequest) -> usize {
        if let (Some(store), Some(user_id)) = (&self.affinity, req.user_id.as_deref()) {
            if let Some(bound) = store.get(user_id).await {
                // the binding only holds while the provider is still eligible
                if let Some(i) = eligible.iter().position(|p| p.name() == bound) {
                    debug!(user_id, provider = %bound, "reusing provider affinity");
                    return i;
                }
                debug!(user_id, provider = %bound, "affinity provider no longer eligible");
            }

            let chosen = self.pick_health_score(eligible);
            store
                .set(
                    user_id,
                    eligible[chosen].name(),
                    Duration::from_secs(AFFINITY_TTL_SECONDS),
                )
                .await;
            return chosen;
        }

        self.pick_health_score(eligible)
    }

    fn pick_weighted_random(&self, eligible: &[Arc<RegisteredProvider>]) -> usize {
        let scores: Vec<f64> = eligible.iter().map(|p| p.metrics.score()).collect();
        let total: f64 = scores.iter().filter(|s| **s > 0.0).sum();
        if total <= 0.0 {
            return 0;
        }

        let draw = {
            let mut rng = self.rng.lock().expect("selector rng poisoned");
            rng.gen_range(0.0..total)
        };

        let mut cumulative = 0.0;
        for (i, score) in scores.iter().enumerate() {
            if *score <= 0.0 {
                continue;
            }
            cumulative += score;
            if cumulative >= draw {
                return i;
            }
        }
        0
    }

    /// Human-readable reason for a routing decision, for structured logs.
    pub fn routing_reason(&self, entry: &RegisteredProvider) -> String {
        match self.strategy {
            Strategy::Priority => format!("priority_{:?}", entry.priority).to_lowercase(),
            Strategy::LeastLatency => format!("least_latency (P95: {}ms)", p95_ms(entry)),
            Strategy::HealthScore => {
                format!("health_score (score: {:.2})", composite_health_score(entry))
            }
            Strategy::Affinity => "user_affinity".to_string(),
            Strategy::RoundRobin => "round_robin".to_string(),
            Strategy::WeightedRandom => format!("weighted_random (score: {:.2})", entry.metrics.score()),
        }
    }
}

/// Observed P95 in milliseconds, falling back to the SLA hint before traffic.
fn p95_ms(entry: &RegisteredProvider) -> u64 {
    match entry.metrics.p95() {
        Some(p95) => p95.as_millis() as u64,
        None => entry.sla.max_latency_p95_ms,
    }
}

/// Composite score: 0.4 success rate + 0.3 latency + 0.3 availability.
fn composite_health_score(entry: &RegisteredProvider) -> f64 {
    let success_rate = entry.metrics.success_rate();
    let latency_score = latency_score(p95_ms(entry));
    let availability_score = match entry.breaker.state() {
        CircuitState::Closed => 1.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Open => 0.0,
    };

    success_rate * 0.4 + latency_score * 0.3 + availability_score * 0.3
}

/// 1.0 under 100ms, 0.0 over 1000ms, linear in between.
fn latency_score(p95_ms: u64) -> f64 {
    if p95_ms < 100 {
        1.0
    } else if p95_ms > 1000 {
        0.0
    } else {
        1.0 - (p95_ms as f64 - 100.0) / 900.0
    }
}

/// 31-multiplier string hash used for deterministic round-robin spread.
fn hash_string(s: &str) -> u32 {
    let mut h: u32 = 0;
    for c in s.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as u32);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HttpGatewayProvider;
    use crate::metrics::ErrorKind;
    use crate::registry::{ProviderPriority, ProviderSpec, SlaConfig};
    use crate::scoring::ScoringConfig;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    fn request(amount: i64, currency: &str, user: Option<&str>) -> PaymentRequest {
        PaymentRequest {
            id: "o1".into(),
            amount,
            currency: currency.into(),
            description: None,
            metadata: None,
            idempotency_key: "pay_abc".into(),
            user_id: user.map(str::to_string),
            email: None,
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        for (provider, priority, sla_p95) in [
            (
                HttpGatewayProvider::stripe("http://localhost:1/stripe").unwrap(),
                ProviderPriority::Primary,
                500,
            ),
            (
                HttpGatewayProvider::klarna("http://localhost:1/klarna").unwrap(),
                ProviderPriority::Secondary,
                200,
            ),
        ] {
            registry
                .register_payment_provider(ProviderSpec {
                    provider: Arc::new(provider),
                    enabled: true,
                    priority,
                    sla: SlaConfig {
                        max_latency_p95_ms: sla_p95,
                        min_success_rate: 0.9,
                    },
                    breaker_config: None,
                })
                .unwrap();
        }
        Arc::new(registry)
    }

    struct MapAffinity {
        bindings: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl AffinityStore for MapAffinity {
        async fn get(&self, user_id: &str) -> Option<String> {
            self.bindings.lock().unwrap().get(user_id).cloned()
        }

        async fn set(&self, user_id: &str, provider: &str, _ttl: StdDuration) {
            self.bindings
                .lock()
                .unwrap()
                .insert(user_id.to_string(), provider.to_string());
        }
    }

    #[tokio::test]
    async fn priority_picks_first_tier() {
        let selector = ProviderSelector::new(registry(), Strategy::Priority);
        let chosen = selector.select(&request(5000, "USD", None)).await.unwrap();
        assert_eq!(chosen.name(), "stripe");
    }

    #[tokio::test]
    async fn least_latency_prefers_faster_provider() {
        let reg = registry();
        // klarna has observed 50ms traffic; stripe falls back to its 500ms SLA hint
        let klarna = reg.payment_provider("klarna").unwrap();
        klarna.metrics.record_request(StdDuration::from_millis(50), true);

        let selector = ProviderSelector::new(reg, Strategy::LeastLatency);
        let chosen = selector.select(&request(5000, "USD", None)).await.unwrap();
        assert_eq!(chosen.name(), "klarna");
    }

    #[tokio::test]
    async fn health_score_penalizes_half_open_breaker() {
        use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};

        let reg = ProviderRegistry::new();
        reg.register_payment_provider(ProviderSpec {
            provider: Arc::new(HttpGatewayProvider::stripe("http://localhost:1/stripe").unwrap()),
            enabled: true,
            priority: ProviderPriority::Primary,
            sla: SlaConfig { max_latency_p95_ms: 50, min_success_rate: 0.9 },
            breaker_config: Some(CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown_period: StdDuration::ZERO,
                ..CircuitBreakerConfig::default()
            }),
        })
        .unwrap();
        reg.register_payment_provider(ProviderSpec {
            provider: Arc::new(HttpGatewayProvider::klarna("http://localhost:1/klarna").unwrap()),
            enabled: true,
            priority: ProviderPriority::Secondary,
            sla: SlaConfig { max_latency_p95_ms: 50, min_success_rate: 0.9 },
            breaker_config: None,
        })
        .unwrap();
        let reg = Arc::new(reg);

        // drive stripe into HALF_OPEN: availability score drops to 0.5
        let stripe = reg.payment_provider("stripe").unwrap();
        stripe.breaker.after_request(false, Some("503"));
        stripe.breaker.before_request().unwrap();
        assert_eq!(stripe.breaker.state(), CircuitState::HalfOpen);

        let selector = ProviderSelector::new(reg, Strategy::HealthScore);
        let chosen = selector.select(&request(5000, "USD", None)).await.unwrap();
        assert_eq!(chosen.name(), "klarna");
    }

    #[tokio::test]
    async fn round_robin_is_deterministic_per_key() {
        let selector = ProviderSelector::new(registry(), Strategy::RoundRobin);
        let req = request(5000, "USD", None);
        let first = selector.select(&req).await.unwrap();
        for _ in 0..5 {
            let again = selector.select(&req).await.unwrap();
            assert_eq!(again.name(), first.name());
        }
    }

    #[tokio::test]
    async fn affinity_reuses_binding_while_eligible() {
        let reg = registry();
        let store = Arc::new(MapAffinity { bindings: Mutex::new(HashMap::new()) });
        store.set("u1", "klarna", StdDuration::from_secs(60)).await;

        let selector =
            ProviderSelector::new(reg, Strategy::Affinity).with_affinity_store(store.clone());
        let chosen = selector.select(&request(5000, "USD", Some("u1"))).await.unwrap();
        assert_eq!(chosen.name(), "klarna");
    }

    #[tokio::test]
    async fn affinity_falls_back_when_provider_ineligible() {
        let reg = registry();
        let store = Arc::new(MapAffinity { bindings: Mutex::new(HashMap::new()) });
        store.set("u1", "klarna", StdDuration::from_secs(60)).await;

        let selector = ProviderSelector::new(reg.clone(), Strategy::Affinity)
            .with_affinity_store(store.clone());

        // klarna caps out at 1_000_000; this request exceeds it
        let chosen = selector
            .select(&request(2_000_000, "USD", Some("u1")))
            .await
            .unwrap();
        assert_eq!(chosen.name(), "stripe");
        // binding is refreshed to the fallback choice
        assert_eq!(store.get("u1").await.as_deref(), Some("stripe"));
    }

    #[tokio::test]
    async fn weighted_random_avoids_zero_score_providers() {
        let reg = registry();
        let stripe = reg.payment_provider("stripe").unwrap();
        for _ in 0..50 {
            stripe.metrics.record_error(ErrorKind::Network, "down");
        }
        stripe.metrics.recompute_score(&ScoringConfig::default());
        assert_eq!(stripe.metrics.score(), 0.0);

        let selector = ProviderSelector::new(reg, Strategy::WeightedRandom).with_seed(7);
        for _ in 0..20 {
            let chosen = selector.select(&request(5000, "USD", None)).await.unwrap();
            assert_eq!(chosen.name(), "klarna");
        }
    }

    #[tokio::test]
    async fn candidates_lead_with_the_selection() {
        let selector = ProviderSelector::new(registry(), Strategy::Priority);
        let candidates = selector.candidates(&request(5000, "USD", None)).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name(), "stripe");
        assert_eq!(candidates[1].name(), "klarna");
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!(Strategy::from_str("priority").unwrap(), Strategy::Priority);
        assert_eq!(Strategy::from_str("health_score").unwrap(), Strategy::HealthScore);
        assert_eq!(Strategy::from_str("weighted_random").unwrap(), Strategy::WeightedRandom);
        assert!(Strategy::from_str("chaos").is_err());
    }

    #[test]
    fn latency_score_is_piecewise_linear() {
        assert_eq!(latency_score(50), 1.0);
        assert_eq!(latency_score(1500), 0.0);
        assert!((latency_score(550) - 0.5).abs() < 0.001);
    }
}
