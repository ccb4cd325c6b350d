//! # Paymesh Core
//!
//! Canonical, provider-agnostic domain layer shared by every Paymesh crate:
//! - normalized payment / refund / compliance / BNPL requests and responses
//! - the canonical error-code taxonomy and its retry classification
//! - the per-payment lifecycle state machine
//! - the retry/backoff policy for transient provider failures
//!
//! Nothing in this crate performs I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod envelope;
pub mod error;
pub mod retry;
pub mod state;
pub mod types;

pub use envelope::{ErrorResponse, SuccessResponse};
pub use error::{ErrorClass, ErrorCode};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use state::{PaymentState, StateError, StateStore};
pub use types::*;

/// Amount in minor units at or above which a compliance check is required.
pub const COMPLIANCE_THRESHOLD: i64 = 1_000_000;

/// End-to-end deadline for a single dispatch, retries included (seconds).
pub const DEFAULT_DISPATCH_TIMEOUT_SECONDS: u64 = 30;

/// How long a terminal payment result stays cached for idempotent replays.
pub const RESULT_CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;

/// TTL for a caller's provider-affinity binding.
pub const AFFINITY_TTL_SECONDS: u64 = 24 * 60 * 60;
