//! Polling-rate and jitter statistics over input arrival times.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::TimingConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TimingStats {
    /// Reports per second over the recent window.
    pub rate: f64,
    /// Highest `rate` seen this session.
    pub max_rate: f64,
    /// Mean inter-report interval (ms).
    pub avg_interval: f64,
    /// Population standard deviation of the interval (ms).
    pub jitter: f64,
}

pub struct TimingAnalyzer {
    intervals: VecDeque<f64>,
    last_timestamp: Option<f64>,
    max_rate: f64,
    capacity: usize,
    window: usize,
    min_samples: usize,
    max_interval_ms: f64,
}

impl TimingAnalyzer {
    pub fn new(cfg: &TimingConfig) -> Self {
        Self {
            intervals: VecDeque::with_capacity(cfg.capacity),
            last_timestamp: None,
            max_rate: 0.0,
            capacity: cfg.capacity.max(1),
            window: cfg.window.max(1),
            min_samples: cfg.min_samples,
            max_interval_ms: cfg.max_interval_ms,
        }
    }

    /// Record an input arriving at `timestamp` (ms).
    pub fn on_input(&mut self, timestamp: f64) {
        let Some(last) = self.last_timestamp.replace(timestamp) else {
            return;
        };

        let interval = timestamp - last;
        // Long gaps are pauses (backgrounded tab), not polling intervals.
        if interval > self.max_interval_ms {
            return;
        }

        if self.intervals.len() == self.capacity {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
    }

    /// Statistics over the most recent window, or `None` until enough
    /// intervals have been collected.
    pub fn compute_stats(&mut self) -> Option<TimingStats> {
        if self.intervals.len() < self.min_samples {
            return None;
        }

        let n = self.intervals.len().min(self.window);
        let window = self.intervals.iter().skip(self.intervals.len() - n);
        let avg_interval = window.clone().sum::<f64>() / n as f64;

        let rate = if avg_interval > 0.0 {
            1000.0 / avg_interval
        } else {
            0.0
        };
        if rate > self.max_rate {
            self.max_rate = rate;
        }

        let variance = window.map(|v| (v - avg_interval).powi(2)).sum::<f64>() / n as f64;

        Some(TimingStats {
            rate,
            max_rate: self.max_rate,
            avg_interval,
            jitter: variance.sqrt(),
        })
    }

    /// Up to `n` most recent intervals, oldest first (graph feed).
    pub fn recent_intervals(&self, n: usize) -> Vec<f64> {
        let skip = self.intervals.len().saturating_sub(n);
        self.intervals.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_timestamp = None;
        self.max_rate = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> TimingAnalyzer {
        TimingAnalyzer::new(&TimingConfig::default())
    }

    fn feed(a: &mut TimingAnalyzer, start: f64, step: f64, count: usize) -> f64 {
        let mut t = start;
        for _ in 0..count {
            a.on_input(t);
            t += step;
        }
        t
    }

    #[test]
    fn test_first_input_records_no_interval() {
        let mut a = analyzer();
        a.on_input(5.0);
        assert_eq!(a.len(), 0);
        a.on_input(9.0);
        assert_eq!(a.recent_intervals(10), vec![4.0]);
    }

    #[test]
    fn test_constant_stream_is_100hz_without_jitter() {
        let mut a = analyzer();
        feed(&mut a, 1000.0, 10.0, 50);
        let stats = a.compute_stats().unwrap();
        assert!((stats.rate - 100.0).abs() < 1e-9, "rate {}", stats.rate);
        assert!((stats.avg_interval - 10.0).abs() < 1e-9);
        assert!(stats.jitter.abs() < 1e-9);
        assert!((stats.max_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_samples() {
        let mut a = analyzer();
        feed(&mut a, 0.0, 8.0, 10); // 9 intervals
        assert!(a.compute_stats().is_none());
        a.on_input(80.0);
        assert!(a.compute_stats().is_some());
    }

    #[test]
    fn test_pause_is_discarded_but_resets_baseline() {
        let mut a = analyzer();
        a.on_input(0.0);
        a.on_input(4.0);
        a.on_input(2000.0); // 1996ms gap, dropped
        a.on_input(2004.0);
        assert_eq!(a.recent_intervals(10), vec![4.0, 4.0]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut a = analyzer();
        a.on_input(0.0);
        a.on_input(7.0);
        let mut t = 7.0;
        for _ in 0..500 {
            t += 1.0;
            a.on_input(t);
        }
        assert_eq!(a.len(), 500);
        assert!(a.recent_intervals(500).iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_jitter_is_population_stddev() {
        let mut a = analyzer();
        // Alternating 8ms / 12ms: mean 10, population stddev 2.
        let mut t = 0.0;
        a.on_input(t);
        for i in 0..20 {
            t += if i % 2 == 0 { 8.0 } else { 12.0 };
            a.on_input(t);
        }
        let stats = a.compute_stats().unwrap();
        assert!((stats.avg_interval - 10.0).abs() < 1e-9);
        assert!((stats.jitter - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_uses_recent_samples_and_max_rate_is_monotonic() {
        let mut a = analyzer();
        let t = feed(&mut a, 0.0, 1.0, 120); // 1000 Hz
        let fast = a.compute_stats().unwrap();
        assert!((fast.rate - 1000.0).abs() < 1e-6);

        feed(&mut a, t, 4.0, 120); // 250 Hz pushes the fast ones out of the window
        let slow = a.compute_stats().unwrap();
        assert!((slow.rate - 250.0).abs() < 1e-6);
        assert!((slow.max_rate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut a = analyzer();
        feed(&mut a, 0.0, 2.0, 30);
        a.compute_stats();
        a.reset();
        assert_eq!(a.len(), 0);
        assert!(a.compute_stats().is_none());
        a.on_input(100.0);
        assert_eq!(a.len(), 0);
    }
}
