//! Circuit breaker pattern per provider

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Closed (normal operation)
    Closed,
    /// Open (rejecting requests)
    Open,
    /// Half-open (limited probing)
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Windowed error rate (0.0-1.0) before opening
    pub error_rate_threshold: f64,
    /// Window for the error-rate calculation
    pub window_duration: Duration,
    /// How long to stay OPEN before allowing a HALF_OPEN probe
    pub cooldown_period: Duration,
    /// Consecutive HALF_OPEN successes before closing
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::DEFAULT_CB_FAILURE_THRESHOLD,
            error_rate_threshold: crate::DEFAULT_CB_ERROR_RATE_THRESHOLD,
            window_duration: Duration::from_secs(crate::DEFAULT_CB_WINDOW_SECONDS),
            cooldown_period: Duration::from_secs(crate::DEFAULT_CB_COOLDOWN_SECONDS),
            half_open_max_requests: crate::DEFAULT_CB_HALF_OPEN_PROBES,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_requests: u32,
    error_count: u32,
    last_state_change: DateTime<Utc>,
    last_error: Option<String>,
    request_history: Vec<(DateTime<Utc>, bool)>,
}

/// Per-provider circuit breaker.
///
/// Shared behind an `Arc`; the interior mutex serializes state updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new breaker in the CLOSED state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                error_count: 0,
                last_state_change: Utc::now(),
                last_error: None,
                request_history: Vec::new(),
            }),
        }
    }

    /// Check whether the next request may pass.
    ///
    /// An OPEN breaker whose cooldown has elapsed transitions to HALF_OPEN
    /// and admits the probe.
    pub fn before_request(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker poisoned");

        match inner.state {
            CircuitState::Open => {
                let elapsed = Utc::now()
                    .signed_duration_since(inner.last_state_change)
                    .to_std()
                    .unwrap_or_default();

                if elapsed >= self.config.cooldown_period {
                    info!(breaker = %self.name, "transitioning to HALF_OPEN after cooldown");
                    inner.transition_to(&self.name, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    let remaining = self.config.cooldown_period.saturating_sub(elapsed);
                    Err(Error::CircuitOpen {
                        provider: self.name.clone(),
                        reason: format!("circuit open, retry in {}s", remaining.as_secs()),
                    })
                }
            }
            CircuitState::HalfOpen | CircuitState::Closed => Ok(()),
        }
    }

    /// Record an outcome and apply any resulting state transition.
    pub fn after_request(&self, success: bool, error: Option<&str>) {
        let mut inner = self.inner.lock().expect("breaker poisoned");

        let now = Utc::now();
        inner.request_history.push((now, success));
        inner.prune_history(now, self.config.window_duration);
        inner.total_requests += 1;

        if success {
            inner.failure_count = 0;
            inner.success_count += 1;

            if inner.state == CircuitState::HalfOpen
                && inner.success_count >= self.config.half_open_max_requests
            {
                info!(
                    breaker = %self.name,
                    probes = inner.success_count,
                    "closing circuit after successful probes"
                );
                inner.transition_to(&self.name, CircuitState::Closed);
            }
        } else {
            inner.error_count += 1;
            inner.failure_count += 1;
            inner.success_count = 0;
            inner.last_error = error.map(str::to_string);

            match inner.state {
                CircuitState::Closed => {
                    if inner.should_open(&self.config, now) {
                        warn!(
                            breaker = %self.name,
                            consecutive_failures = inner.failure_count,
                            error_rate = format!("{:.2}%", inner.error_rate(now, self.config.window_duration) * 100.0),
                            "opening circuit"
                        );
                        inner.transition_to(&self.name, CircuitState::Open);
                    }
                }
                CircuitState::HalfOpen => {
                    warn!(breaker = %self.name, "reopening circuit after failure in HALF_OPEN");
                    inner.transition_to(&self.name, CircuitState::Open);
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker poisoned").state
    }

    /// Snapshot for status dumps.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().expect("breaker poisoned");
        let now = Utc::now();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            error_count: inner.error_count,
            error_rate: inner.error_rate(now, self.config.window_duration),
            last_state_change: inner.last_state_change,
            last_error: inner.last_error.clone(),
        }
    }

    /// Reset all counters and return to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.total_requests = 0;
        inner.error_count = 0;
        inner.last_state_change = Utc::now();
        inner.last_error = None;
        inner.request_history.clear();
        info!(breaker = %self.name, "reset to CLOSED state");
    }
}

impl BreakerInner {
    fn should_open(&self, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> bool {
        if self.failure_count >= config.failure_threshold {
            return true;
        }
        self.error_rate(now, config.window_duration) >= config.error_rate_threshold
            && self.total_requests >= 10
    }

    fn error_rate(&self, now: DateTime<Utc>, window: Duration) -> f64 {
        let window_start = now - chrono::Duration::from_std(window).unwrap_or_default();
        let mut total = 0u32;
        let mut errors = 0u32;
        for (timestamp, success) in &self.request_history {
            if *timestamp > window_start {
                total += 1;
                if !success {
                    errors += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }

    fn prune_history(&mut self, now: DateTime<Utc>, window: Duration) {
        let window_start = now - chrono::Duration::from_std(window).unwrap_or_default();
        self.request_history.retain(|(t, _)| *t > window_start);
    }

    fn transition_to(&mut self, name: &str, new_state: CircuitState) {
        let old_state = self.state;
        self.state = new_state;
        self.last_state_change = Utc::now();

        match new_state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.error_count = 0;
                self.total_requests = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }

        info!(breaker = %name, %old_state, %new_state, "state transition");
    }
}

/// Point-in-time breaker snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    /// Provider the breaker guards
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Consecutive successes (meaningful in HALF_OPEN)
    pub success_count: u32,
    /// Requests since the last CLOSED reset
    pub total_requests: u32,
    /// Errors since the last CLOSED reset
    pub error_count: u32,
    /// Windowed error rate
    pub error_rate: f64,
    /// When the state last changed
    pub last_state_change: DateTime<Utc>,
    /// Most recent error message
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failures: u32, cooldown: Duration, probes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            error_rate_threshold: 0.5,
            window_duration: Duration::from_secs(60),
            cooldown_period: cooldown,
            half_open_max_requests: probes,
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", config(3, Duration::from_secs(60), 2));

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_request().is_ok());

        cb.after_request(false, Some("503"));
        cb.after_request(false, Some("503"));
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.after_request(false, Some("503"));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.before_request(), Err(Error::CircuitOpen { .. })));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let cb = CircuitBreaker::new("test", config(3, Duration::from_secs(60), 2));
        cb.after_request(false, Some("503"));
        cb.after_request(false, Some("503"));
        cb.after_request(true, None);
        cb.after_request(false, Some("503"));
        cb.after_request(false, Some("503"));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_on_windowed_error_rate() {
        // high consecutive threshold so only the rate path can trip
        let cb = CircuitBreaker::new("test", config(100, Duration::from_secs(60), 2));

        for _ in 0..5 {
            cb.after_request(true, None);
        }
        for _ in 0..4 {
            cb.after_request(false, Some("502"));
        }
        // 4/9 errors and fewer than 10 samples: still closed
        assert_eq!(cb.state(), CircuitState::Closed);

        // 5/10 errors at 10 samples hits the 50% threshold
        cb.after_request(false, Some("502"));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn cooldown_admits_half_open_probe() {
        let cb = CircuitBreaker::new("test", config(1, Duration::ZERO, 2));
        cb.after_request(false, Some("down"));
        assert_eq!(cb.state(), CircuitState::Open);

        // zero cooldown: next check transitions to HALF_OPEN and admits
        assert!(cb.before_request().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", config(1, Duration::ZERO, 2));
        cb.after_request(false, Some("down"));
        cb.before_request().unwrap(); // HALF_OPEN
        cb.after_request(false, Some("still down"));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_enough_probes() {
        let cb = CircuitBreaker::new("test", config(1, Duration::ZERO, 3));
        cb.after_request(false, Some("down"));
        cb.before_request().unwrap(); // HALF_OPEN

        cb.after_request(true, None);
        cb.after_request(true, None);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.after_request(true, None);
        assert_eq!(cb.state(), CircuitState::Closed);

        // counters reset on close
        let stats = cb.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.failure_count, 0);
    }

    #[test]
    fn reset_restores_closed() {
        let cb = CircuitBreaker::new("test", config(1, Duration::from_secs(300), 2));
        cb.after_request(false, Some("down"));
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_request().is_ok());
        assert!(cb.stats().last_error.is_none());
    }
}
