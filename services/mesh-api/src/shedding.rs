//! Admission control under overload
//!
//! Four independent trip conditions, any one of which sheds the request:
//! inflight count, global P99 latency, an estimated-CPU proxy, and the
//! number of open circuit breakers. Accepted requests hold an inflight
//! guard for their lifetime.

use crate::config::SheddingConfig;
use mesh_providers::latency::LatencyWindow;
use mesh_providers::ProviderRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// CPU samples are refreshed at most this often.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Task count treated as 100% load; a scheduler-concurrency proxy, not a
/// real utilization measurement.
const TASKS_AT_FULL_LOAD: f64 = 1250.0;

struct CpuSample {
    checked_at: Instant,
    usage: f64,
}

/// Load shedder guarding the payment request plane.
pub struct LoadShedder {
    config: SheddingConfig,
    inflight: AtomicI64,
    total_requests: AtomicU64,
    shed_requests: AtomicU64,
    latency: Arc<LatencyWindow>,
    registry: Arc<ProviderRegistry>,
    cpu: Mutex<CpuSample>,
}

impl LoadShedder {
    /// Create a shedder over the global latency window and the registry.
    pub fn new(config: SheddingConfig, latency: Arc<LatencyWindow>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            inflight: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            shed_requests: AtomicU64::new(0),
            latency,
            registry,
            cpu: Mutex::new(CpuSample {
                checked_at: Instant::now()
                    .checked_sub(CPU_SAMPLE_INTERVAL)
                    .unwrap_or_else(Instant::now),
                usage: 0.0,
            }),
        }
    }

    /// Whether this request must be rejected, and why.
    pub fn should_shed(&self) -> Option<&'static str> {
        if !self.config.enabled {
            return None;
        }

        let reason = self.trip_reason();
        if reason.is_some() {
            self.shed_requests.fetch_add(1, Ordering::Relaxed);
        }
        reason
    }

    fn trip_reason(&self) -> Option<&'static str> {
        if self.inflight.load(Ordering::Relaxed) > self.config.max_active_requests {
            return Some("max_active_requests_exceeded");
        }

        let p99_ms = self.latency.percentiles().p99.as_millis() as u64;
        if p99_ms > self.config.latency_threshold_ms {
            return Some("high_latency_detected");
        }

        if self.cpu_estimate() > self.config.cpu_threshold {
            return Some("high_cpu_usage");
        }

        if self.registry.open_breaker_count() >= self.config.circuit_open_threshold {
            return Some("multiple_circuits_open");
        }

        None
    }

    /// Accept a request: the returned guard holds an inflight slot until drop.
    pub fn begin(self: &Arc<Self>) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        InflightGuard { shedder: Arc::clone(self) }
    }

    /// Record one request's latency into the global window.
    pub fn observe_latency(&self, latency: Duration) {
        self.latency.record(latency);
    }

    /// Estimated CPU in [0, 1], cached for [`CPU_SAMPLE_INTERVAL`].
    fn cpu_estimate(&self) -> f64 {
        let mut sample = self.cpu.lock().expect("cpu sample poisoned");
        if sample.checked_at.elapsed() >= CPU_SAMPLE_INTERVAL {
            let alive = tokio::runtime::Handle::try_current()
                .map(|h| h.metrics().num_alive_tasks() as f64)
                .unwrap_or(0.0);
            sample.usage = (alive / TASKS_AT_FULL_LOAD).min(1.0);
            sample.checked_at = Instant::now();
        }
        sample.usage
    }

    /// Shedding statistics for the metrics surface.
    pub fn stats(&self) -> SheddingStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let shed = self.shed_requests.load(Ordering::Relaxed);
        let shed_rate = if total + shed > 0 {
            shed as f64 / (total + shed) as f64 * 100.0
        } else {
            0.0
        };

        SheddingStats {
            enabled: self.config.enabled,
            active_requests: self.inflight.load(Ordering::Relaxed),
            total_requests: total,
            shed_requests: shed,
            shed_rate_percent: shed_rate,
            max_active_allowed: self.config.max_active_requests,
            cpu_usage: self.cpu.lock().expect("cpu sample poisoned").usage,
            cpu_threshold: self.config.cpu_threshold,
        }
    }
}

/// RAII inflight slot.
pub struct InflightGuard {
    shedder: Arc<LoadShedder>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.shedder.inflight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Load shedding statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SheddingStats {
    /// Master switch state
    pub enabled: bool,
    /// Requests currently holding a slot
    pub active_requests: i64,
    /// Requests accepted since start
    pub total_requests: u64,
    /// Requests shed since start
    pub shed_requests: u64,
    /// Percentage of arrivals shed
    pub shed_rate_percent: f64,
    /// Configured inflight ceiling
    pub max_active_allowed: i64,
    /// Last CPU estimate
    pub cpu_usage: f64,
    /// Configured CPU ceiling
    pub cpu_threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shedder(config: SheddingConfig) -> Arc<LoadShedder> {
        Arc::new(LoadShedder::new(
            config,
            Arc::new(LatencyWindow::new(100)),
            Arc::new(ProviderRegistry::new()),
        ))
    }

    #[tokio::test]
    async fn accepts_under_normal_conditions() {
        let shedder = shedder(SheddingConfig::default());
        assert!(shedder.should_shed().is_none());
    }

    #[tokio::test]
    async fn disabled_shedder_always_accepts() {
        let config = SheddingConfig { enabled: false, max_active_requests: 0, ..SheddingConfig::default() };
        let shedder = shedder(config);
        let _guards: Vec<_> = (0..5).map(|_| shedder.begin()).collect();
        assert!(shedder.should_shed().is_none());
    }

    #[tokio::test]
    async fn sheds_when_inflight_exceeds_ceiling() {
        let config = SheddingConfig { max_active_requests: 2, ..SheddingConfig::default() };
        let shedder = shedder(config);

        let _g1 = shedder.begin();
        let _g2 = shedder.begin();
        assert!(shedder.should_shed().is_none());

        let g3 = shedder.begin();
        assert_eq!(shedder.should_shed(), Some("max_active_requests_exceeded"));

        drop(g3);
        assert!(shedder.should_shed().is_none());
    }

    #[tokio::test]
    async fn sheds_on_high_p99() {
        let config = SheddingConfig { latency_threshold_ms: 100, ..SheddingConfig::default() };
        let shedder = shedder(config);
        for _ in 0..20 {
            shedder.observe_latency(Duration::from_millis(500));
        }
        assert_eq!(shedder.should_shed(), Some("high_latency_detected"));
    }

    #[tokio::test]
    async fn sheds_when_breakers_are_open() {
        use mesh_providers::gateway::HttpGatewayProvider;
        use mesh_providers::registry::{ProviderPriority, ProviderSpec, SlaConfig};

        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register_payment_provider(ProviderSpec {
                provider: Arc::new(HttpGatewayProvider::stripe("http://localhost:1/stripe").unwrap()),
                enabled: true,
                priority: ProviderPriority::Primary,
                sla: SlaConfig::default(),
                breaker_config: None,
            })
            .unwrap();

        let stripe = registry.payment_provider("stripe").unwrap();
        for _ in 0..10 {
            stripe.breaker.after_request(false, Some("503"));
        }

        let config = SheddingConfig { circuit_open_threshold: 1, ..SheddingConfig::default() };
        let shedder = Arc::new(LoadShedder::new(
            config,
            Arc::new(LatencyWindow::new(100)),
            registry,
        ));
        assert_eq!(shedder.should_shed(), Some("multiple_circuits_open"));
    }

    #[tokio::test]
    async fn stats_report_shed_rate() {
        let config = SheddingConfig { max_active_requests: 0, ..SheddingConfig::default() };
        let shedder = shedder(config);

        let _g = shedder.begin();
        assert!(shedder.should_shed().is_some());

        let stats = shedder.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.shed_requests, 1);
        assert_eq!(stats.active_requests, 1);
        assert!(stats.shed_rate_percent > 0.0);
    }
}
