//! Per-provider request metrics
//!
//! One [`ProviderMetrics`] per registered provider, owned by the registry.
//! Request outcomes land here on the hot path; the scoring engine reshapes
//! the score from a snapshot on its own cadence.

use crate::latency::{LatencyPercentiles, LatencyWindow};
use crate::DEFAULT_LATENCY_WINDOW_SAMPLES;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

/// Classified provider error kinds, weighted differently by scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Gateway-side failure (5xx, undecodable response)
    Gateway,
    /// Bank/issuer rejection (declined, insufficient funds)
    Bank,
    /// Transport failure (reset, refused, DNS, timeout)
    Network,
    /// Caller-induced failure
    Client,
}

/// A timestamped error observation.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// When the error was recorded
    pub timestamp: DateTime<Utc>,
    /// Provider or transport message
    pub message: String,
}

#[derive(Debug)]
pub(crate) struct Inner {
    total_requests: u64,
    success_requests: u64,
    failed_requests: u64,

    total_latency: Duration,
    avg_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,

    gateway_errors: Vec<ErrorEvent>,
    bank_errors: Vec<ErrorEvent>,
    network_errors: Vec<ErrorEvent>,
    client_errors: Vec<ErrorEvent>,

    active_connections: usize,
    queue_depth: usize,

    score: f64,
    last_updated: DateTime<Utc>,
    last_request: Option<DateTime<Utc>>,
}

/// Mutable metrics for one provider.
#[derive(Debug)]
pub struct ProviderMetrics {
    name: String,
    window: LatencyWindow,
    inner: RwLock<Inner>,
}

impl ProviderMetrics {
    /// Create metrics for a provider, starting at a full score.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window: LatencyWindow::new(DEFAULT_LATENCY_WINDOW_SAMPLES),
            inner: RwLock::new(Inner {
                total_requests: 0,
                success_requests: 0,
                failed_requests: 0,
                total_latency: Duration::ZERO,
                avg_latency: Duration::ZERO,
                min_latency: None,
                max_latency: Duration::ZERO,
                gateway_errors: Vec::new(),
                bank_errors: Vec::new(),
                network_errors: Vec::new(),
                client_errors: Vec::new(),
                active_connections: 0,
                queue_depth: 0,
                score: 100.0,
                last_updated: Utc::now(),
                last_request: None,
            }),
        }
    }

    /// Provider name these metrics belong to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The latency window backing the percentile columns.
    pub fn latency_window(&self) -> &LatencyWindow {
        &self.window
    }

    /// Record one request outcome.
    pub fn record_request(&self, latency: Duration, success: bool) {
        self.window.record(latency);

        let mut inner = self.inner.write().expect("provider metrics poisoned");
        inner.total_requests += 1;
        inner.last_request = Some(Utc::now());

        if success {
            inner.success_requests += 1;
        } else {
            inner.failed_requests += 1;
        }

        inner.total_latency += latency;
        inner.avg_latency = inner.total_latency / inner.total_requests as u32;

        inner.min_latency = Some(match inner.min_latency {
            Some(min) if min <= latency => min,
            _ => latency,
        });
        if latency > inner.max_latency {
            inner.max_latency = latency;
        }
    }

    /// Record a classified error event.
    pub fn record_error(&self, kind: ErrorKind, message: impl Into<String>) {
        let event = ErrorEvent {
            timestamp: Utc::now(),
            message: message.into(),
        };

        let mut inner = self.inner.write().expect("provider metrics poisoned");
        match kind {
            ErrorKind::Gateway => inner.gateway_errors.push(event),
            ErrorKind::Bank => inner.bank_errors.push(event),
            ErrorKind::Network => inner.network_errors.push(event),
            ErrorKind::Client => inner.client_errors.push(event),
        }
    }

    /// Update the active-connection gauge.
    pub fn set_active_connections(&self, count: usize) {
        self.inner.write().expect("provider metrics poisoned").active_connections = count;
    }

    /// Count one in-flight request toward the load penalty.
    pub fn inc_active_connections(&self) {
        self.inner.write().expect("provider metrics poisoned").active_connections += 1;
    }

    /// Release one in-flight request.
    pub fn dec_active_connections(&self) {
        let mut inner = self.inner.write().expect("provider metrics poisoned");
        inner.active_connections = inner.active_connections.saturating_sub(1);
    }

    /// Update the queue-depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.write().expect("provider metrics poisoned").queue_depth = depth;
    }

    /// Current health score.
    pub fn score(&self) -> f64 {
        self.inner.read().expect("provider metrics poisoned").score
    }

    /// Observed P95 latency, if any samples exist.
    pub fn p95(&self) -> Option<Duration> {
        if self.window.count() == 0 {
            None
        } else {
            Some(self.window.percentiles().p95)
        }
    }

    /// Success ratio in [0, 1]; 1.0 before any traffic.
    pub fn success_rate(&self) -> f64 {
        let inner = self.inner.read().expect("provider metrics poisoned");
        if inner.total_requests == 0 {
            1.0
        } else {
            inner.success_requests as f64 / inner.total_requests as f64
        }
    }

    /// Serializable snapshot for status dumps.
    pub fn summary(&self) -> MetricsSummary {
        let percentiles = self.window.percentiles();
        let inner = self.inner.read().expect("provider metrics poisoned");

        // same optimistic pre-traffic default as success_rate()
        let success_rate = if inner.total_requests == 0 {
            100.0
        } else {
            inner.success_requests as f64 / inner.total_requests as f64 * 100.0
        };

        MetricsSummary {
            name: self.name.clone(),
            score: inner.score,
            total_requests: inner.total_requests,
            success_rate,
            avg_latency_ms: inner.avg_latency.as_millis() as u64,
            p50_latency_ms: percentiles.p50.as_millis() as u64,
            p95_latency_ms: percentiles.p95.as_millis() as u64,
            p99_latency_ms: percentiles.p99.as_millis() as u64,
            min_latency_ms: inner.min_latency.unwrap_or(Duration::ZERO).as_millis() as u64,
            max_latency_ms: inner.max_latency.as_millis() as u64,
            gateway_errors: inner.gateway_errors.len(),
            bank_errors: inner.bank_errors.len(),
            network_errors: inner.network_errors.len(),
            client_errors: inner.client_errors.len(),
            active_connections: inner.active_connections,
            queue_depth: inner.queue_depth,
            last_updated: inner.last_updated,
        }
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.write().expect("provider metrics poisoned");
        f(&mut inner)
    }
}

impl Inner {
    /// Drop error events older than `now - decay_window`.
    pub(crate) fn clean_errors(&mut self, decay_window: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(decay_window).unwrap_or_default();
        self.gateway_errors.retain(|e| e.timestamp > cutoff);
        self.bank_errors.retain(|e| e.timestamp > cutoff);
        self.network_errors.retain(|e| e.timestamp > cutoff);
        self.client_errors.retain(|e| e.timestamp > cutoff);
    }

    pub(crate) fn error_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.gateway_errors.len(),
            self.bank_errors.len(),
            self.network_errors.len(),
            self.client_errors.len(),
        )
    }

    pub(crate) fn avg_latency(&self) -> Duration {
        self.avg_latency
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.active_connections
    }

    pub(crate) fn set_score(&mut self, score: f64) {
        self.score = score;
        self.last_updated = Utc::now();
    }
}

/// Point-in-time metrics snapshot for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Provider name
    pub name: String,
    /// Current health score
    pub score: f64,
    /// Lifetime request count
    pub total_requests: u64,
    /// Success percentage (0-100)
    pub success_rate: f64,
    /// Mean latency
    pub avg_latency_ms: u64,
    /// Median latency
    pub p50_latency_ms: u64,
    /// 95th percentile latency
    pub p95_latency_ms: u64,
    /// 99th percentile latency
    pub p99_latency_ms: u64,
    /// Fastest observed request
    pub min_latency_ms: u64,
    /// Slowest observed request
    pub max_latency_ms: u64,
    /// Gateway errors in the decay window
    pub gateway_errors: usize,
    /// Bank errors in the decay window
    pub bank_errors: usize,
    /// Network errors in the decay window
    pub network_errors: usize,
    /// Client errors in the decay window
    pub client_errors: usize,
    /// Active connections gauge
    pub active_connections: usize,
    /// Queue depth gauge
    pub queue_depth: usize,
    /// Last scoring pass
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn counters_track_outcomes() {
        let m = ProviderMetrics::new("stripe");
        m.record_request(ms(100), true);
        m.record_request(ms(200), false);
        m.record_request(ms(300), true);

        let s = m.summary();
        assert_eq!(s.total_requests, 3);
        assert!((s.success_rate - 66.666).abs() < 0.01);
        assert_eq!(s.avg_latency_ms, 200);
        assert_eq!(s.min_latency_ms, 100);
        assert_eq!(s.max_latency_ms, 300);
    }

    #[test]
    fn failure_never_decrements() {
        let m = ProviderMetrics::new("stripe");
        m.record_request(ms(50), true);
        let before = m.summary();
        m.record_request(ms(50), false);
        let after = m.summary();
        assert_eq!(after.total_requests, before.total_requests + 1);
        // successful counter untouched by a failure
        assert!((after.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn errors_land_in_their_bucket() {
        let m = ProviderMetrics::new("stripe");
        m.record_error(ErrorKind::Gateway, "502");
        m.record_error(ErrorKind::Network, "reset");
        m.record_error(ErrorKind::Network, "refused");

        let s = m.summary();
        assert_eq!(s.gateway_errors, 1);
        assert_eq!(s.network_errors, 2);
        assert_eq!(s.bank_errors, 0);
        assert_eq!(s.client_errors, 0);
    }

    #[test]
    fn avg_is_total_over_count() {
        let m = ProviderMetrics::new("stripe");
        for v in [100u64, 150, 200, 250] {
            m.record_request(ms(v), true);
        }
        assert_eq!(m.summary().avg_latency_ms, 175);
    }

    #[test]
    fn success_rate_defaults_high_without_traffic() {
        let m = ProviderMetrics::new("stripe");
        assert!((m.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(m.p95().is_none());
        // the summary view agrees with the routing view before any traffic
        assert!((m.summary().success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn active_connections_gauge_tracks_inflight() {
        let m = ProviderMetrics::new("stripe");
        m.inc_active_connections();
        m.inc_active_connections();
        m.dec_active_connections();
        assert_eq!(m.summary().active_connections, 1);
        m.dec_active_connections();
        m.dec_active_connections(); // saturates at zero
        assert_eq!(m.summary().active_connections, 0);
    }
}
