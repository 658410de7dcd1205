//! Run-level tallies for a simulation.

use std::collections::VecDeque;

/// Latency samples kept per run. Older samples roll off the front.
const SAMPLE_WINDOW: usize = 4096;

/// Outcome counts and a rolling latency window for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    /// Pair resolutions that produced a price.
    pub resolved: u64,
    /// Pair resolutions that came back empty.
    pub failed: u64,
    latencies: VecDeque<u64>,
}

/// Latency distribution over the sample window, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyReport {
    pub mean: u64,
    pub p50: u64,
    pub p99: u64,
    pub max: u64,
}

impl SimulationMetrics {
    pub fn record_resolved(&mut self, latency_ms: u64) {
        self.resolved += 1;
        if self.latencies.len() == SAMPLE_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Total resolutions attempted.
    pub fn requests(&self) -> u64 {
        self.resolved + self.failed
    }

    /// Share of attempts that produced a price, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }

        self.resolved as f64 / requests as f64
    }

    /// Summarize the latency window in one sorting pass.
    pub fn latency(&self) -> LatencyReport {
        if self.latencies.is_empty() {
            return LatencyReport::default();
        }

        let mut sorted: Vec<u64> = self.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();

        LatencyReport {
            mean: sum / sorted.len() as u64,
            p50: rank(&sorted, 50),
            p99: rank(&sorted, 99),
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank percentile over an already sorted window.
fn rank(sorted: &[u64], pct: usize) -> u64 {
    let idx = (pct * sorted.len()).div_ceil(100).saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_success_rate() {
        let mut metrics = SimulationMetrics::default();

        metrics.record_resolved(40);
        metrics.record_resolved(80);
        metrics.record_failed();

        assert_eq!(metrics.requests(), 3);
        assert_eq!(metrics.resolved, 2);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn latency_report_over_window() {
        let mut metrics = SimulationMetrics::default();
        for ms in [10, 20, 30, 40, 500] {
            metrics.record_resolved(ms);
        }

        let report = metrics.latency();
        assert_eq!(report.mean, 120);
        assert_eq!(report.p50, 30);
        assert_eq!(report.p99, 500);
        assert_eq!(report.max, 500);
    }

    #[test]
    fn empty_window_reports_zeros() {
        let metrics = SimulationMetrics::default();
        assert_eq!(metrics.success_rate(), 0.0);
        assert_eq!(metrics.latency().p99, 0);
    }
}
