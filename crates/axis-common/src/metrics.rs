//! Cycle-time metrics for the cyclic thread.
//!
//! Ring buffer of recent cycle periods plus running statistics; the record
//! path performs no allocation so it is safe to call every cycle.

use std::time::Duration;

/// Cycle timing statistics with a ring buffer for percentile queries.
#[derive(Debug)]
pub struct CycleMetrics {
    /// Ring buffer of cycle periods in nanoseconds.
    samples: Box<[u64]>,
    write_pos: usize,
    sample_count: usize,
    total_cycles: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    overrun_count: u64,
    /// Configured cycle deadline in nanoseconds.
    deadline_ns: u64,
}

impl CycleMetrics {
    /// Create a collector retaining `window` samples; cycles longer than
    /// `deadline` count as overruns.
    #[must_use]
    pub fn new(window: usize, deadline: Duration) -> Self {
        let size = window.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            deadline_ns: deadline.as_nanos() as u64,
        }
    }

    /// Record one cycle period in nanoseconds. Allocation-free.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns > self.deadline_ns {
            self.overrun_count += 1;
        }
    }

    /// Record one cycle period.
    pub fn record(&mut self, period: Duration) {
        self.record_ns(period.as_nanos() as u64);
    }

    /// Total cycles recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Shortest observed cycle.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Longest observed cycle.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean cycle period.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_cycles))
    }

    /// Number of cycles that exceeded the deadline.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Peak-to-peak jitter over the whole run.
    #[must_use]
    pub fn jitter(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.max_ns - self.min_ns))
    }

    /// Percentile over the retained window (0.0 to 100.0).
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_recording() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(2));

        metrics.record(Duration::from_micros(1900));
        metrics.record(Duration::from_micros(2100));
        metrics.record(Duration::from_micros(2000));

        assert_eq!(metrics.total_cycles(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_micros(1900)));
        assert_eq!(metrics.max(), Some(Duration::from_micros(2100)));
        assert_eq!(metrics.overrun_count(), 1);
        assert_eq!(metrics.jitter(), Some(Duration::from_micros(200)));
    }

    #[test]
    fn ring_buffer_caps_window() {
        let mut metrics = CycleMetrics::new(10, Duration::from_millis(2));
        for i in 0..25 {
            metrics.record_ns(i * 1000);
        }
        assert_eq!(metrics.total_cycles(), 25);
        // Percentile queries only see the retained window
        assert!(metrics.percentile(0.0).unwrap().as_nanos() >= 15_000);
    }

    #[test]
    fn percentile_bounds() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(2));
        assert!(metrics.percentile(50.0).is_none());

        for i in 1..=100u64 {
            metrics.record_ns(i * 1000);
        }
        let p99 = metrics.percentile(99.0).unwrap();
        assert!(p99.as_nanos() >= 98_000);
        assert!(metrics.percentile(101.0).is_none());
        assert!(metrics.percentile(-1.0).is_none());
    }
}
