//! Running detection statistics.

use std::time::Duration;

/// Weight of the previous average in the latency EMA.
const EMA_PRIOR_WEIGHT: f64 = 0.9;

/// Latency EMA and cycle counters. Reset whenever detection is re-enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionStats {
    avg_ms: Option<f64>,
    last_ms: Option<f64>,
    cycles: u64,
    failures: u64,
    skipped: u64,
}

impl DetectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful cycle.
    pub fn record_success(&mut self, latency: Duration) {
        self.record_latency_ms(latency.as_secs_f64() * 1000.0);
    }

    /// Fold one latency sample into the average. The first sample seeds it.
    pub fn record_latency_ms(&mut self, ms: f64) {
        self.avg_ms = Some(match self.avg_ms {
            Some(avg) => EMA_PRIOR_WEIGHT * avg + (1.0 - EMA_PRIOR_WEIGHT) * ms,
            None => ms,
        });
        self.last_ms = Some(ms);
        self.cycles += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// A cycle that found no usable frame.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn avg_ms(&self) -> Option<f64> {
        self.avg_ms
    }

    pub fn last_ms(&self) -> Option<f64> {
        self.last_ms
    }

    /// Completed detection cycles since the last reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_sequence() {
        let mut stats = DetectionStats::new();
        assert_eq!(stats.avg_ms(), None);

        stats.record_latency_ms(10.0);
        assert!((stats.avg_ms().unwrap() - 10.0).abs() < 1e-9);
        stats.record_latency_ms(20.0);
        assert!((stats.avg_ms().unwrap() - 11.0).abs() < 1e-9);
        stats.record_latency_ms(30.0);
        assert!((stats.avg_ms().unwrap() - 12.9).abs() < 1e-9);
        assert_eq!(stats.cycles(), 3);
        assert_eq!(stats.last_ms(), Some(30.0));
    }

    #[test]
    fn test_durations_feed_the_same_average() {
        let mut stats = DetectionStats::new();
        stats.record_success(Duration::from_millis(40));
        assert!((stats.avg_ms().unwrap() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut stats = DetectionStats::new();
        stats.record_latency_ms(50.0);
        stats.record_failure();
        stats.record_skip();
        stats.reset();
        assert_eq!(stats, DetectionStats::default());
    }
}
