//! Retry policy for transient provider failures
//!
//! Classification comes from [`ErrorCode::classify`]; this module decides
//! whether a given attempt gets another try and how long to wait. Backoff is
//! capped exponential with uniform jitter; a provider-supplied `Retry-After`
//! overrides the computed delay on rate limits.

use crate::error::{ErrorClass, ErrorCode};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Retry behavior tunables.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts allowed across the whole payment
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Hard cap on a single backoff
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay (0.25 = +/-25%)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
        }
    }
}

/// Outcome of evaluating one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub should_retry: bool,
    /// How long to wait before it
    pub backoff: Duration,
    /// Why this decision was made
    pub reason: &'static str,
}

impl RetryDecision {
    fn stop(reason: &'static str) -> Self {
        Self { should_retry: false, backoff: Duration::ZERO, reason }
    }
}

/// Stateless-per-attempt retry strategy with an owned jitter RNG.
pub struct RetryPolicy {
    config: RetryConfig,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    /// Create a policy with an entropy-seeded RNG.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a policy with a fixed RNG seed (deterministic jitter).
    pub fn with_seed(config: RetryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Attempts allowed across the whole payment.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide whether `attempt` (0-based) gets a successor after failing
    /// with `code`. `retry_after` is the provider's hint, honored on rate
    /// limits.
    pub fn evaluate(&self, attempt: u32, code: ErrorCode, retry_after: Option<Duration>) -> RetryDecision {
        if attempt + 1 >= self.config.max_attempts {
            return RetryDecision::stop("max_attempts_exceeded");
        }

        match code.classify() {
            ErrorClass::Retryable | ErrorClass::Degraded => {
                let backoff = match (code, retry_after) {
                    (ErrorCode::RateLimited, Some(hint)) => hint,
                    _ => self.backoff(attempt),
                };
                RetryDecision {
                    should_retry: true,
                    backoff,
                    reason: match code {
                        ErrorCode::RateLimited => "rate_limited",
                        ErrorCode::ProviderTimeout | ErrorCode::Timeout | ErrorCode::ConnectionTimeout => "timeout",
                        ErrorCode::GatewayTimeout => "gateway_timeout",
                        ErrorCode::GatewayUnavailable => "bad_gateway",
                        ErrorCode::ProviderDown => "service_unavailable",
                        ErrorCode::NetworkError | ErrorCode::ConnectionReset | ErrorCode::DnsError => "network_error",
                        _ => "server_error",
                    },
                }
            }
            ErrorClass::ClientSide => RetryDecision::stop("client_error"),
            ErrorClass::Fatal => RetryDecision::stop("unretryable_error"),
        }
    }

    /// Capped exponential backoff with jitter for a 0-based attempt index.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX));
        let capped = exp.min(self.config.max_delay);

        let jitter = {
            let mut rng = self.rng.lock().expect("jitter rng poisoned");
            rng.gen_range(-self.config.jitter_factor..=self.config.jitter_factor)
        };
        let jittered = capped.as_secs_f64() * (1.0 + jitter);
        if jittered <= 0.0 {
            self.config.base_delay
        } else {
            Duration::from_secs_f64(jittered)
        }
    }
}

/// Parse a `Retry-After` header value: integer seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(when) = DateTime::parse_from_rfc2822(value) {
        let delta = when.with_timezone(&Utc) - now;
        return match delta.to_std() {
            Ok(d) => Some(d),
            Err(_) => None,
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RetryPolicy {
        RetryPolicy::with_seed(RetryConfig::default(), 42)
    }

    #[test]
    fn retryable_code_gets_backoff() {
        let decision = policy().evaluate(0, ErrorCode::ProviderError, None);
        assert!(decision.should_retry);
        assert!(decision.backoff > Duration::ZERO);
    }

    #[test]
    fn client_error_stops_immediately() {
        let decision = policy().evaluate(0, ErrorCode::CardDeclined, None);
        assert!(!decision.should_retry);
        assert_eq!(decision.reason, "client_error");
    }

    #[test]
    fn attempts_are_capped() {
        let p = policy();
        let decision = p.evaluate(p.max_attempts() - 1, ErrorCode::NetworkError, None);
        assert!(!decision.should_retry);
        assert_eq!(decision.reason, "max_attempts_exceeded");
    }

    #[test]
    fn retry_after_overrides_backoff_on_rate_limit() {
        let decision = policy().evaluate(0, ErrorCode::RateLimited, Some(Duration::from_secs(2)));
        assert!(decision.should_retry);
        assert_eq!(decision.backoff, Duration::from_secs(2));
        assert_eq!(decision.reason, "rate_limited");
    }

    #[test]
    fn retry_after_hint_ignored_for_other_codes() {
        let config = RetryConfig {
            max_delay: Duration::from_millis(500),
            ..RetryConfig::default()
        };
        let p = RetryPolicy::with_seed(config, 7);
        let decision = p.evaluate(0, ErrorCode::ProviderDown, Some(Duration::from_secs(60)));
        assert!(decision.should_retry);
        assert!(decision.backoff < Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::with_seed(config, 1);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(800));
        // 100ms * 2^10 would be ~102s; capped at 5s
        assert_eq!(p.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig {
            jitter_factor: 0.25,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::with_seed(config, 99);
        for _ in 0..100 {
            let b = p.backoff(2); // nominal 400ms
            assert!(b >= Duration::from_millis(300), "{b:?}");
            assert!(b <= Duration::from_millis(500), "{b:?}");
        }
    }

    #[test]
    fn parses_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn parses_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let hint = parse_retry_after("Wed, 01 May 2024 12:00:30 +0000", now).unwrap();
        assert_eq!(hint, Duration::from_secs(30));
        // dates in the past yield no wait
        assert_eq!(parse_retry_after("Wed, 01 May 2024 11:59:00 +0000", now), None);
    }
}
