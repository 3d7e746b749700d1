//! Side-effect free readers used to build presentation snapshots.
//!
//! None of these create series. A tuple that was never written, an empty
//! histogram, or a helper applied to the wrong kind of series reads as `0.0`.

use super::{Sample, SeriesHandle};

pub fn counter_value(series: &SeriesHandle, labels: &[&str]) -> f64 {
    match series.sample(labels) {
        Some(Sample::Counter(value)) => value,
        _ => 0.0,
    }
}

/// Sum over every label tuple of a counter.
pub fn counter_sum(series: &SeriesHandle) -> f64 {
    series
        .samples()
        .into_iter()
        .map(|sample| match sample {
            Sample::Counter(value) => value,
            _ => 0.0,
        })
        .sum()
}

pub fn gauge_value(series: &SeriesHandle, labels: &[&str]) -> f64 {
    match series.sample(labels) {
        Some(Sample::Gauge(value)) => value,
        _ => 0.0,
    }
}

/// Mean of the observations recorded for one label tuple.
pub fn histogram_mean(series: &SeriesHandle, labels: &[&str]) -> f64 {
    match series.sample(labels) {
        Some(Sample::Histogram { sum, count }) if count > 0 => sum / count as f64,
        _ => 0.0,
    }
}

/// Mean over all label tuples, weighted by observation count.
pub fn histogram_mean_all(series: &SeriesHandle) -> f64 {
    let (sum, count) = series
        .samples()
        .into_iter()
        .fold((0.0, 0u64), |(sum, count), sample| match sample {
            Sample::Histogram { sum: s, count: c } => (sum + s, count + c),
            _ => (sum, count),
        });
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MetricKind, MetricRegistry};

    fn histogram(registry: &MetricRegistry) -> SeriesHandle {
        registry
            .declare(
                "test_latency_seconds",
                "latency",
                MetricKind::Histogram {
                    buckets: vec![0.1, 1.0, 10.0],
                },
                &["model"],
            )
            .unwrap()
    }

    #[test]
    fn test_unwritten_reads_are_zero() {
        let registry = MetricRegistry::new();
        let counter = registry
            .declare("test_total", "t", MetricKind::Counter, &["a", "b"])
            .unwrap();
        let gauge = registry
            .declare("test_gauge", "g", MetricKind::Gauge, &["a"])
            .unwrap();
        let hist = histogram(&registry);

        assert_eq!(counter_value(&counter, &["x", "y"]), 0.0);
        assert_eq!(counter_sum(&counter), 0.0);
        assert_eq!(gauge_value(&gauge, &["x"]), 0.0);
        assert_eq!(histogram_mean(&hist, &["x"]), 0.0);
        assert_eq!(histogram_mean_all(&hist), 0.0);
    }

    #[test]
    fn test_counter_sum_spans_label_tuples() {
        let registry = MetricRegistry::new();
        let counter = registry
            .declare("test_sum_total", "t", MetricKind::Counter, &["status"])
            .unwrap();
        counter.increment(&["200"], 3.0).unwrap();
        counter.increment(&["400"], 1.0).unwrap();
        counter.increment(&["500"], 2.0).unwrap();

        assert_eq!(counter_sum(&counter), 6.0);
        assert_eq!(counter_value(&counter, &["400"]), 1.0);
    }

    #[test]
    fn test_histogram_means() {
        let registry = MetricRegistry::new();
        let hist = histogram(&registry);
        hist.observe(&["a"], 1.0).unwrap();
        hist.observe(&["a"], 3.0).unwrap();
        hist.observe(&["b"], 8.0).unwrap();

        assert_eq!(histogram_mean(&hist, &["a"]), 2.0);
        assert_eq!(histogram_mean(&hist, &["b"]), 8.0);
        assert_eq!(histogram_mean_all(&hist), 4.0);
    }

    #[test]
    fn test_helpers_ignore_mismatched_kind() {
        let registry = MetricRegistry::new();
        let gauge = registry
            .declare("test_mismatch", "g", MetricKind::Gauge, &[])
            .unwrap();
        gauge.set(&[], 7.0).unwrap();

        assert_eq!(counter_value(&gauge, &[]), 0.0);
        assert_eq!(histogram_mean(&gauge, &[]), 0.0);
        assert_eq!(gauge_value(&gauge, &[]), 7.0);
    }
}
