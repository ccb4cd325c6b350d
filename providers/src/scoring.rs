//! Health scoring engine
//!
//! Deterministic mapping from a metrics snapshot to a score in
//! `[min_score, max_score]`. Invoked periodically by the registry's score
//! updater, never inline on the request path.

use crate::metrics::ProviderMetrics;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scoring tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Starting score before penalties
    pub base_score: f64,
    /// Average latency below this costs nothing
    pub latency_threshold_low: Duration,
    /// Average latency at or above this moves into the middle tier
    pub latency_threshold_med: Duration,
    /// Average latency at or above this moves into the top tier
    pub latency_threshold_high: Duration,
    /// Penalty for the low latency tier
    pub latency_penalty_low: f64,
    /// Penalty for the middle latency tier
    pub latency_penalty_med: f64,
    /// Penalty for the top latency tier
    pub latency_penalty_high: f64,

    /// Penalty per gateway error in the decay window
    pub gateway_error_penalty: f64,
    /// Penalty per bank error in the decay window
    pub bank_error_penalty: f64,
    /// Penalty per network error in the decay window
    pub network_error_penalty: f64,
    /// Penalty per client error in the decay window
    pub client_error_penalty: f64,

    /// Active connections at or above this draw a load penalty
    pub high_load_threshold: usize,
    /// Maximum load penalty
    pub load_penalty: f64,

    /// Error events older than this are forgotten
    pub error_decay_window: Duration,

    /// Score floor
    pub min_score: f64,
    /// Score ceiling
    pub max_score: f64,
    /// How often the periodic scorer runs
    pub score_update_period: Duration,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            latency_threshold_low: Duration::from_millis(100),
            latency_threshold_med: Duration::from_millis(500),
            latency_threshold_high: Duration::from_millis(1000),
            latency_penalty_low: 2.5,
            latency_penalty_med: 7.5,
            latency_penalty_high: 15.0,
            gateway_error_penalty: 5.0,
            bank_error_penalty: 2.5,
            network_error_penalty: 7.5,
            client_error_penalty: 1.0,
            high_load_threshold: 50,
            load_penalty: 10.0,
            error_decay_window: Duration::from_secs(5 * 60),
            min_score: 0.0,
            max_score: 100.0,
            score_update_period: Duration::from_secs(10),
        }
    }
}

impl ProviderMetrics {
    /// Recompute this provider's score from current metrics.
    ///
    /// Applies error decay first, then the latency tier, per-event error
    /// penalties, and the load penalty, clamping to the configured band.
    /// Returns the new score.
    pub fn recompute_score(&self, config: &ScoringConfig) -> f64 {
        self.with_inner(|inner| {
            inner.clean_errors(config.error_decay_window);

            let mut score = config.base_score;

            let avg = inner.avg_latency();
            if avg >= config.latency_threshold_high {
                score -= config.latency_penalty_high;
            } else if avg >= config.latency_threshold_med {
                score -= config.latency_penalty_med;
            } else if avg >= config.latency_threshold_low {
                score -= config.latency_penalty_low;
            }

            let (gateway, bank, network, client) = inner.error_counts();
            score -= gateway as f64 * config.gateway_error_penalty;
            score -= bank as f64 * config.bank_error_penalty;
            score -= network as f64 * config.network_error_penalty;
            score -= client as f64 * config.client_error_penalty;

            let active = inner.active_connections();
            if active >= config.high_load_threshold {
                let load_factor =
                    (active - config.high_load_threshold) as f64 / config.high_load_threshold as f64;
                score -= config.load_penalty * load_factor.min(1.0);
            }

            let score = score.clamp(config.min_score, config.max_score);
            inner.set_score(score);
            score
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ErrorKind;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn pristine_provider_keeps_base_score() {
        let m = ProviderMetrics::new("stripe");
        assert_eq!(m.recompute_score(&ScoringConfig::default()), 100.0);
    }

    #[test]
    fn latency_tiers_are_exclusive() {
        let config = ScoringConfig::default();

        // avg 50ms: below every tier
        let m = ProviderMetrics::new("fast");
        m.record_request(ms(50), true);
        assert_eq!(m.recompute_score(&config), 100.0);

        // avg 200ms: low tier only
        let m = ProviderMetrics::new("ok");
        m.record_request(ms(200), true);
        assert_eq!(m.recompute_score(&config), 97.5);

        // avg 600ms: middle tier only
        let m = ProviderMetrics::new("slow");
        m.record_request(ms(600), true);
        assert_eq!(m.recompute_score(&config), 92.5);

        // avg 1500ms: top tier only
        let m = ProviderMetrics::new("awful");
        m.record_request(ms(1500), true);
        assert_eq!(m.recompute_score(&config), 85.0);
    }

    #[test]
    fn error_events_are_weighted() {
        let config = ScoringConfig::default();
        let m = ProviderMetrics::new("flaky");
        m.record_error(ErrorKind::Gateway, "502");
        m.record_error(ErrorKind::Network, "reset");
        m.record_error(ErrorKind::Bank, "declined");
        m.record_error(ErrorKind::Client, "bad request");

        // 100 - 5.0 - 7.5 - 2.5 - 1.0
        assert_eq!(m.recompute_score(&config), 84.0);
    }

    #[test]
    fn load_penalty_scales_and_saturates() {
        let config = ScoringConfig::default();

        let m = ProviderMetrics::new("busy");
        m.set_active_connections(75); // (75-50)/50 = 0.5 of the penalty
        assert_eq!(m.recompute_score(&config), 95.0);

        m.set_active_connections(500); // saturated
        assert_eq!(m.recompute_score(&config), 90.0);
    }

    #[test]
    fn score_clamps_at_floor() {
        let config = ScoringConfig::default();
        let m = ProviderMetrics::new("dead");
        for _ in 0..50 {
            m.record_error(ErrorKind::Network, "down");
        }
        assert_eq!(m.recompute_score(&config), 0.0);
    }

    #[test]
    fn decayed_errors_stop_counting() {
        let config = ScoringConfig {
            error_decay_window: Duration::ZERO,
            ..ScoringConfig::default()
        };
        let m = ProviderMetrics::new("recovering");
        m.record_error(ErrorKind::Gateway, "502");
        // zero-length window drops every event before scoring
        assert_eq!(m.recompute_score(&config), 100.0);
        assert_eq!(m.summary().gateway_errors, 0);
    }
}
