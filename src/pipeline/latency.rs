//! Rolling RTT/jitter tracker driving the reordering buffer's delay (C2).

use std::collections::VecDeque;

const WINDOW_SIZE: usize = 100;
const K: f64 = 3.0;
const BASE_PROCESSING_MS: f64 = 10.0;
const MIN_DELAY_MS: f64 = 10.0;
const MAX_DELAY_MS: f64 = 500.0;
const DEFAULT_DELAY_MS: f64 = 50.0;
const MIN_SAMPLES: usize = 10;
/// Deltas beyond this are treated as clock desync, not real latency.
const ABERRATION_THRESHOLD_MS: f64 = 5000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean_rtt_ms: f64,
    pub stdev_jitter_ms: f64,
    pub adaptive_delay_ms: f64,
    pub sample_size: usize,
}

/// `adaptive_delay_ms = clamp(mean_rtt + base_proc + k*stdev_jitter, min, max)`.
/// With fewer than [`MIN_SAMPLES`] samples, returns [`DEFAULT_DELAY_MS`].
pub struct LatencyMonitor {
    latencies: VecDeque<f64>,
    window_size: usize,
    k: f64,
    base_processing_ms: f64,
    min_delay_ms: f64,
    max_delay_ms: f64,
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new(WINDOW_SIZE, K, BASE_PROCESSING_MS)
    }
}

impl LatencyMonitor {
    pub fn new(window_size: usize, k: f64, base_processing_ms: f64) -> Self {
        Self {
            latencies: VecDeque::with_capacity(window_size),
            window_size,
            k,
            base_processing_ms,
            min_delay_ms: MIN_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
        }
    }

    pub fn record_latency(&mut self, event_time_ms: i64, arrival_time_ms: f64) {
        let latency_ms = (arrival_time_ms - event_time_ms as f64).abs();
        if latency_ms >= ABERRATION_THRESHOLD_MS {
            return;
        }
        if self.latencies.len() == self.window_size {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }

    pub fn get_adaptive_delay_ms(&self) -> f64 {
        if self.latencies.len() < MIN_SAMPLES {
            return DEFAULT_DELAY_MS;
        }
        let mean = mean(&self.latencies);
        let stdev = stdev(&self.latencies, mean);
        let raw = mean + self.base_processing_ms + self.k * stdev;
        raw.clamp(self.min_delay_ms, self.max_delay_ms)
    }

    pub fn get_stats(&self) -> LatencyStats {
        if self.latencies.len() < 2 {
            return LatencyStats {
                mean_rtt_ms: 0.0,
                stdev_jitter_ms: 0.0,
                adaptive_delay_ms: DEFAULT_DELAY_MS,
                sample_size: self.latencies.len(),
            };
        }
        let mean_rtt = mean(&self.latencies);
        let stdev_jitter = stdev(&self.latencies, mean_rtt);
        LatencyStats {
            mean_rtt_ms: mean_rtt,
            stdev_jitter_ms: stdev_jitter,
            adaptive_delay_ms: self.get_adaptive_delay_ms(),
            sample_size: self.latencies.len(),
        }
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &VecDeque<f64>, mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_with_insufficient_samples() {
        let mut m = LatencyMonitor::default();
        for i in 0..5 {
            m.record_latency(i * 10, i as f64 * 10.0 + 5.0);
        }
        assert_eq!(m.get_adaptive_delay_ms(), DEFAULT_DELAY_MS);
    }

    #[test]
    fn aberrant_samples_are_dropped() {
        let mut m = LatencyMonitor::default();
        m.record_latency(0, 6000.0);
        assert_eq!(m.get_stats().sample_size, 0);
    }

    #[test]
    fn adaptive_delay_clamped_to_bounds() {
        let mut m = LatencyMonitor::default();
        for i in 0..20 {
            m.record_latency(i * 10, i as f64 * 10.0);
        }
        let delay = m.get_adaptive_delay_ms();
        assert!(delay >= MIN_DELAY_MS && delay <= MAX_DELAY_MS);
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let mut m = LatencyMonitor::new(3, 3.0, 10.0);
        m.record_latency(0, 10.0);
        m.record_latency(0, 20.0);
        m.record_latency(0, 30.0);
        m.record_latency(0, 1000.0);
        assert_eq!(m.latencies.len(), 3);
        assert!(!m.latencies.contains(&10.0));
    }
}
