//! Prometheus metrics for the mesh API

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Counter, Encoder,
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metric handles backed by one registry.
pub struct Metrics {
    /// Backing registry
    pub registry: Registry,

    /// HTTP requests processed
    pub http_requests_total: Counter,
    /// Requests rejected by the load shedder
    pub requests_shed_total: Counter,
    /// Requests currently inflight
    pub requests_in_flight: IntGauge,

    /// Charges by terminal outcome (`status` label)
    pub payments_total: IntCounterVec,
    /// Intent registrations (`reused` label)
    pub intents_total: IntCounterVec,
    /// Provider charge duration by provider name
    pub provider_request_duration_seconds: HistogramVec,
    /// Provider charge outcomes by provider name and result
    pub provider_requests_total: IntCounterVec,
    /// Compliance checks by outcome
    pub compliance_checks_total: IntCounterVec,
}

impl Metrics {
    fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = register_counter_with_registry!(
            Opts::new("paymesh_http_requests_total", "Total HTTP requests processed"),
            registry
        )?;

        let requests_shed_total = register_counter_with_registry!(
            Opts::new("paymesh_requests_shed_total", "Requests rejected by the load shedder"),
            registry
        )?;

        let requests_in_flight = register_int_gauge_with_registry!(
            Opts::new("paymesh_requests_in_flight", "Requests currently being processed"),
            registry
        )?;

        let payments_total = register_int_counter_vec_with_registry!(
            Opts::new("paymesh_payments_total", "Charges by terminal status"),
            &["status"],
            registry
        )?;

        let intents_total = register_int_counter_vec_with_registry!(
            Opts::new("paymesh_intents_total", "Intent registrations"),
            &["reused"],
            registry
        )?;

        let provider_request_duration_seconds = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "paymesh_provider_request_duration_seconds",
                "Provider charge duration in seconds"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["provider"],
            registry
        )?;

        let provider_requests_total = register_int_counter_vec_with_registry!(
            Opts::new("paymesh_provider_requests_total", "Provider charge outcomes"),
            &["provider", "result"],
            registry
        )?;

        let compliance_checks_total = register_int_counter_vec_with_registry!(
            Opts::new("paymesh_compliance_checks_total", "Compliance checks by outcome"),
            &["outcome"],
            registry
        )?;

        Ok(Self {
            registry,
            http_requests_total,
            requests_shed_total,
            requests_in_flight,
            payments_total,
            intents_total,
            provider_request_duration_seconds,
            provider_requests_total,
            compliance_checks_total,
        })
    }

    /// Export all metrics in Prometheus text format.
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance.
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("failed to initialize metrics"))
});
