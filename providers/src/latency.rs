//! Sliding-window latency percentiles

use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;

/// P50/P95/P99 snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyPercentiles {
    /// Median latency
    pub p50: Duration,
    /// 95th percentile latency
    pub p95: Duration,
    /// 99th percentile latency
    pub p99: Duration,
}

/// Bounded FIFO of latency samples with on-demand percentile computation.
///
/// Multi-reader / single-writer; percentile computation sorts a local copy,
/// so reads never block writes for longer than the snapshot.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: RwLock<Vec<Duration>>,
    capacity: usize,
}

impl LatencyWindow {
    /// Create a window holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest beyond capacity.
    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.write().expect("latency window poisoned");
        samples.push(latency);
        if samples.len() > self.capacity {
            let excess = samples.len() - self.capacity;
            samples.drain(..excess);
        }
    }

    /// P50/P95/P99 over the current window; zeros when empty.
    pub fn percentiles(&self) -> LatencyPercentiles {
        let samples = self.samples.read().expect("latency window poisoned");
        if samples.is_empty() {
            return LatencyPercentiles::default();
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_unstable();

        LatencyPercentiles {
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }

    /// Mean over the current window; zero when empty.
    pub fn average(&self) -> Duration {
        let samples = self.samples.read().expect("latency window poisoned");
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    /// Smallest sample; zero when empty.
    pub fn min(&self) -> Duration {
        let samples = self.samples.read().expect("latency window poisoned");
        samples.iter().min().copied().unwrap_or(Duration::ZERO)
    }

    /// Largest sample; zero when empty.
    pub fn max(&self) -> Duration {
        let samples = self.samples.read().expect("latency window poisoned");
        samples.iter().max().copied().unwrap_or(Duration::ZERO)
    }

    /// Number of samples currently held.
    pub fn count(&self) -> usize {
        self.samples.read().expect("latency window poisoned").len()
    }

    /// Drop all samples.
    pub fn reset(&self) {
        self.samples.write().expect("latency window poisoned").clear();
    }
}

/// The p-th percentile of sorted samples, interpolating between brackets.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let p = p.clamp(0.0, 100.0);
    let index = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = lower + 1;

    if upper >= sorted.len() {
        return sorted[sorted.len() - 1];
    }

    let weight = index - lower as f64;
    let blended = sorted[lower].as_secs_f64() * (1.0 - weight) + sorted[upper].as_secs_f64() * weight;
    Duration::from_secs_f64(blended)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_window_yields_zeros() {
        let window = LatencyWindow::new(10);
        let p = window.percentiles();
        assert_eq!(p.p50, Duration::ZERO);
        assert_eq!(p.p99, Duration::ZERO);
        assert_eq!(window.average(), Duration::ZERO);
        assert_eq!(window.count(), 0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let window = LatencyWindow::new(1000);
        for i in 1..=100 {
            window.record(ms(i));
        }
        let p = window.percentiles();
        assert!(p.p50 <= p.p95);
        assert!(p.p95 <= p.p99);
        assert_eq!(p.p50, Duration::from_micros(50_500)); // interpolated median of 1..=100ms
    }

    #[test]
    fn interpolates_between_brackets() {
        let window = LatencyWindow::new(10);
        window.record(ms(100));
        window.record(ms(200));
        let p = window.percentiles();
        assert_eq!(p.p50, ms(150));
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let window = LatencyWindow::new(5);
        for i in 0..20 {
            window.record(ms(i));
            assert!(window.count() <= 5);
        }
        assert_eq!(window.count(), 5);
        // oldest samples evicted: min is 15ms
        assert_eq!(window.min(), ms(15));
        assert_eq!(window.max(), ms(19));
    }

    #[test]
    fn average_min_max() {
        let window = LatencyWindow::new(10);
        window.record(ms(100));
        window.record(ms(300));
        assert_eq!(window.average(), ms(200));
        assert_eq!(window.min(), ms(100));
        assert_eq!(window.max(), ms(300));
    }

    #[test]
    fn reset_clears_samples() {
        let window = LatencyWindow::new(10);
        window.record(ms(100));
        window.reset();
        assert_eq!(window.count(), 0);
        assert_eq!(window.percentiles(), LatencyPercentiles::default());
    }
}
