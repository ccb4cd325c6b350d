//! Environment-driven service configuration

use mesh_core::{RetryConfig, COMPLIANCE_THRESHOLD};
use mesh_providers::Strategy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub bind_addr: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Provider routing strategy
    pub strategy: Strategy,
    /// Base URL of the upstream gateway host
    pub gateway_base: String,
    /// Amount in minor units that triggers the compliance gate
    pub compliance_threshold: i64,
    /// End-to-end dispatch deadline
    pub dispatch_timeout: Duration,
    /// Retry tunables
    pub retry: RetryConfig,
    /// Load shedding tunables
    pub shedding: SheddingConfig,
}

/// Load shedding tunables.
#[derive(Debug, Clone)]
pub struct SheddingConfig {
    /// Master switch
    pub enabled: bool,
    /// Maximum concurrent accepted requests
    pub max_active_requests: i64,
    /// Global P99 above this sheds load (milliseconds)
    pub latency_threshold_ms: u64,
    /// Estimated CPU above this sheds load (0.0-1.0)
    pub cpu_threshold: f64,
    /// Open breakers at or above this count shed load
    pub circuit_open_threshold: usize,
}

impl Default for SheddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_active_requests: 1000,
            latency_threshold_ms: 5000,
            cpu_threshold: 0.80,
            circuit_open_threshold: 2,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the environment, with production defaults.
    pub fn from_env() -> Self {
        let strategy = env::var("ROUTING_STRATEGY")
            .ok()
            .and_then(|v| Strategy::from_str(&v).ok())
            .unwrap_or(Strategy::Priority);

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| {
            let addr = env::var("REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
            match env::var("REDIS_PASSWORD") {
                Ok(password) if !password.is_empty() => format!("redis://default:{password}@{addr}"),
                _ => format!("redis://{addr}"),
            }
        });

        Config {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            redis_url,
            strategy,
            gateway_base: env::var("GATEWAY_BASE")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            compliance_threshold: env_or("COMPLIANCE_THRESHOLD", COMPLIANCE_THRESHOLD),
            dispatch_timeout: Duration::from_secs(env_or(
                "DISPATCH_TIMEOUT_SECONDS",
                mesh_core::DEFAULT_DISPATCH_TIMEOUT_SECONDS,
            )),
            retry: RetryConfig {
                max_attempts: env_or("RETRY_MAX_ATTEMPTS", 5),
                ..RetryConfig::default()
            },
            shedding: SheddingConfig {
                enabled: env_or("LOAD_SHEDDING_ENABLED", true),
                max_active_requests: env_or("SHED_MAX_ACTIVE_REQUESTS", 1000),
                latency_threshold_ms: env_or("SHED_LATENCY_THRESHOLD_MS", 5000),
                cpu_threshold: env_or("SHED_CPU_THRESHOLD", 0.80),
                circuit_open_threshold: env_or("SHED_CIRCUIT_OPEN_THRESHOLD", 2),
            },
        }
    }
}
