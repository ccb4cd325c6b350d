//! # Paymesh Providers
//!
//! Payment/BNPL/compliance provider connectivity layer with:
//! - Normalized provider traits and HTTP gateway adapters
//! - Per-provider circuit breakers (consecutive + windowed error rate)
//! - Per-provider metrics with sliding-window latency percentiles
//! - Periodic health scoring with error decay
//! - Health-aware provider selection strategies
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Provider Registry                      │
//! │   (capabilities · priority · enabled · compliance)  │
//! └────────────┬────────────────────────────────────────┘
//!              │
//!     ┌────────┼──────────────┬──────────────┐
//!     │        │              │              │
//! ┌───▼────┐ ┌─▼───────┐ ┌────▼─────┐ ┌──────▼───────┐
//! │ Stripe │ │Razorpay │ │  Klarna  │ │  Compliance  │
//! │Gateway │ │ Gateway │ │ Gateway  │ │   Gateway    │
//! └───┬────┘ └─┬───────┘ └────┬─────┘ └──────┬───────┘
//!     │        │              │              │
//!     └────────┼──────────────┴──────────────┘
//!              │
//! ┌────────────▼────────────────────────────────────┐
//! │   Circuit Breaker + Metrics + Scoring + Select  │
//! └─────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod circuit_breaker;
pub mod connector;
pub mod error;
pub mod gateway;
pub mod latency;
pub mod metrics;
pub mod registry;
pub mod scoring;
pub mod selector;

pub use connector::{ComplianceProvider, Provider};
pub use error::{Error, Result};
pub use registry::{ProviderPriority, ProviderRegistry, RegisteredProvider, SlaConfig};
pub use selector::{ProviderSelector, Strategy};

/// Default latency window capacity (samples)
pub const DEFAULT_LATENCY_WINDOW_SAMPLES: usize = 1000;

/// Default consecutive failures before a breaker opens
pub const DEFAULT_CB_FAILURE_THRESHOLD: u32 = 10;

/// Default windowed error rate before a breaker opens
pub const DEFAULT_CB_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Default breaker error-rate window (seconds)
pub const DEFAULT_CB_WINDOW_SECONDS: u64 = 60;

/// Default breaker cooldown before a HALF_OPEN probe (seconds)
pub const DEFAULT_CB_COOLDOWN_SECONDS: u64 = 30;

/// Default consecutive HALF_OPEN successes before closing
pub const DEFAULT_CB_HALF_OPEN_PROBES: u32 = 5;

/// Default per-request timeout toward a provider (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
