//! Ring-buffered latency/throughput tracking with SLA compliance and
//! alerting, mirroring the three metrics the orchestrator records on every
//! processed file.

use std::collections::VecDeque;

const RECENT_WINDOW: usize = 10;
const RECENT_VIOLATION_RATE_THRESHOLD: f64 = 0.10;
const OVERALL_VIOLATION_RATE_THRESHOLD: f64 = 0.05;
const TREND_REGRESSION_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaStatus {
    Ok,
    Degraded,
    Unavailable,
    NoData,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    /// Mean of the most recent 10% of samples (at least one sample).
    pub recent_avg: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceSummary {
    pub detection: MetricStats,
    pub processing: MetricStats,
    pub throughput: MetricStats,
    pub sla_compliance_rate: f64,
    pub sla_status: SlaStatus,
    pub sla_violations: u64,
    pub total_samples: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: &'static str,
    pub message: String,
}

pub struct PerformanceMonitor {
    max_samples: usize,
    sla_threshold_ms: f64,
    detection: VecDeque<f64>,
    processing: VecDeque<f64>,
    throughput: VecDeque<f64>,
    sla_violations: u64,
    total_samples: u64,
}

impl PerformanceMonitor {
    pub fn new(max_samples: usize, sla_threshold_ms: f64) -> Self {
        Self {
            max_samples,
            sla_threshold_ms,
            detection: VecDeque::with_capacity(max_samples),
            processing: VecDeque::with_capacity(max_samples),
            throughput: VecDeque::with_capacity(max_samples),
            sla_violations: 0,
            total_samples: 0,
        }
    }

    pub fn record(&mut self, detection_ms: f64, processing_ms: f64, throughput_per_sec: f64) {
        push_capped(&mut self.detection, detection_ms, self.max_samples);
        push_capped(&mut self.processing, processing_ms, self.max_samples);
        push_capped(&mut self.throughput, throughput_per_sec, self.max_samples);

        self.total_samples += 1;
        if detection_ms > self.sla_threshold_ms {
            self.sla_violations += 1;
        }
    }

    pub fn summary(&self) -> PerformanceSummary {
        let compliance_rate = if self.total_samples == 0 {
            1.0
        } else {
            1.0 - (self.sla_violations as f64 / self.total_samples as f64)
        };

        let status = if self.total_samples == 0 {
            SlaStatus::NoData
        } else if compliance_rate >= 0.99 {
            SlaStatus::Ok
        } else if compliance_rate >= 0.95 {
            SlaStatus::Degraded
        } else {
            SlaStatus::Unavailable
        };

        PerformanceSummary {
            detection: metric_stats(&self.detection),
            processing: metric_stats(&self.processing),
            throughput: metric_stats(&self.throughput),
            sla_compliance_rate: compliance_rate,
            sla_status: status,
            sla_violations: self.sla_violations,
            total_samples: self.total_samples,
        }
    }

    /// Whether the most recent 10 samples kept the violation rate at or
    /// below 10%.
    pub fn check_sla_compliance(&self) -> bool {
        if self.detection.is_empty() {
            return true;
        }
        let recent: Vec<f64> = self
            .detection
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .copied()
            .collect();
        let violations = recent.iter().filter(|&&v| v > self.sla_threshold_ms).count();
        (violations as f64 / recent.len() as f64) <= RECENT_VIOLATION_RATE_THRESHOLD
    }

    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if !self.detection.is_empty() {
            let recent: Vec<f64> = self
                .detection
                .iter()
                .rev()
                .take(RECENT_WINDOW)
                .copied()
                .collect();
            let recent_violations = recent.iter().filter(|&&v| v > self.sla_threshold_ms).count();
            let recent_rate = recent_violations as f64 / recent.len() as f64;
            if recent_rate > RECENT_VIOLATION_RATE_THRESHOLD {
                alerts.push(Alert {
                    level: AlertLevel::Critical,
                    component: "detection",
                    message: format!(
                        "recent SLA violation rate {:.1}% exceeds {:.0}%",
                        recent_rate * 100.0,
                        RECENT_VIOLATION_RATE_THRESHOLD * 100.0
                    ),
                });
            }
        }

        if self.total_samples > 0 {
            let overall_rate = self.sla_violations as f64 / self.total_samples as f64;
            if overall_rate > OVERALL_VIOLATION_RATE_THRESHOLD {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    component: "detection",
                    message: format!(
                        "overall SLA violation rate {:.1}% exceeds {:.0}%",
                        overall_rate * 100.0,
                        OVERALL_VIOLATION_RATE_THRESHOLD * 100.0
                    ),
                });
            }
        }

        if let Some(alert) = trend_regression_alert(&self.detection) {
            alerts.push(alert);
        }

        alerts
    }

    pub fn reset(&mut self) {
        self.detection.clear();
        self.processing.clear();
        self.throughput.clear();
        self.sla_violations = 0;
        self.total_samples = 0;
    }
}

fn push_capped(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let n = sorted.len();
    let k = (n - 1) as f64 * (p / 100.0);
    let f = k.floor() as usize;
    let c = f + 1;
    if c >= n {
        return sorted[n - 1];
    }
    sorted[f] + (k - f as f64) * (sorted[c] - sorted[f])
}

fn metric_stats(samples: &VecDeque<f64>) -> MetricStats {
    if samples.is_empty() {
        return MetricStats::default();
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / count as f64;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    let recent_window = ((count as f64 * 0.10).ceil() as usize).max(1);
    let recent_sum: f64 = samples.iter().rev().take(recent_window).sum();
    let recent_avg = recent_sum / recent_window.min(samples.len()) as f64;

    MetricStats {
        count,
        min: sorted[0],
        mean,
        median: percentile(&sorted, 50.0),
        stddev: variance.sqrt(),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        max: *sorted.last().unwrap(),
        recent_avg,
    }
}

/// Flags a regression when the mean of the most recent 10 samples exceeds
/// 1.5x the mean of the earliest 10 samples, mirroring the original
/// monitor's trend check.
fn trend_regression_alert(samples: &VecDeque<f64>) -> Option<Alert> {
    if samples.len() < RECENT_WINDOW * 2 {
        return None;
    }
    let early_mean: f64 =
        samples.iter().take(RECENT_WINDOW).sum::<f64>() / RECENT_WINDOW as f64;
    let recent_mean: f64 =
        samples.iter().rev().take(RECENT_WINDOW).sum::<f64>() / RECENT_WINDOW as f64;
    if early_mean > 0.0 && recent_mean > early_mean * TREND_REGRESSION_FACTOR {
        Some(Alert {
            level: AlertLevel::Warning,
            component: "detection",
            message: format!(
                "recent mean latency {recent_mean:.1}ms is {:.1}x the early mean {early_mean:.1}ms",
                recent_mean / early_mean
            ),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_status_when_empty() {
        let monitor = PerformanceMonitor::new(100, 100.0);
        assert_eq!(monitor.summary().sla_status, SlaStatus::NoData);
    }

    #[test]
    fn records_violation_above_threshold() {
        let mut monitor = PerformanceMonitor::new(100, 100.0);
        monitor.record(150.0, 10.0, 5.0);
        let summary = monitor.summary();
        assert_eq!(summary.sla_violations, 1);
        assert!(summary.sla_compliance_rate < 1.0);
    }

    #[test]
    fn ring_buffer_caps_at_max_samples() {
        let mut monitor = PerformanceMonitor::new(5, 100.0);
        for i in 0..10 {
            monitor.record(i as f64, i as f64, i as f64);
        }
        assert_eq!(monitor.summary().detection.count, 5);
    }

    #[test]
    fn metric_stats_computes_min_median_stddev_and_recent_avg() {
        let mut monitor = PerformanceMonitor::new(1000, 1000.0);
        for i in 1..=10 {
            monitor.record(i as f64, 1.0, 1.0);
        }
        let stats = monitor.summary().detection;
        assert_eq!(stats.count, 10);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.median, percentile(&(1..=10).map(|i| i as f64).collect::<Vec<_>>(), 50.0));
        assert!(stats.stddev > 0.0);
        // recent 10% of 10 samples = 1 sample = the last one recorded.
        assert_eq!(stats.recent_avg, 10.0);
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 50.0), 3.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 5.0);
    }

    #[test]
    fn status_thresholds_match_spec() {
        let mut monitor = PerformanceMonitor::new(1000, 100.0);
        for _ in 0..100 {
            monitor.record(10.0, 5.0, 5.0);
        }
        assert_eq!(monitor.summary().sla_status, SlaStatus::Ok);

        let mut degraded = PerformanceMonitor::new(1000, 100.0);
        for i in 0..100 {
            degraded.record(if i < 3 { 200.0 } else { 10.0 }, 5.0, 5.0);
        }
        assert_eq!(degraded.summary().sla_status, SlaStatus::Degraded);
    }

    #[test]
    fn trend_regression_detected() {
        let mut monitor = PerformanceMonitor::new(1000, 10_000.0);
        for _ in 0..RECENT_WINDOW {
            monitor.record(10.0, 1.0, 1.0);
        }
        for _ in 0..RECENT_WINDOW {
            monitor.record(100.0, 1.0, 1.0);
        }
        let alerts = monitor.alerts();
        assert!(alerts.iter().any(|a| a.message.contains("early mean")));
    }
}
