//! Labeled metric registry backed by a private `prometheus::Registry`.
//!
//! Series are declared once at startup and handed out as cheap, cloneable
//! [`SeriesHandle`]s. Every write remembers the label tuple it touched so
//! reads can report zero for tuples that were never written without
//! materializing them in the scrape output.

pub mod read;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("metric {name} already declared with a different kind or label schema")]
    Conflict { name: String },

    #[error("metric {name} is a {actual}, not a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("counter {name} cannot move backwards (delta {delta})")]
    NegativeIncrement { name: String, delta: f64 },

    #[error("failed to encode metrics: {0}")]
    Encoding(String),

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram { buckets: Vec<f64> },
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram { .. } => "histogram",
        }
    }
}

enum SeriesVec {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

/// A single point read back from a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Sample {
    Counter(f64),
    Gauge(f64),
    Histogram { sum: f64, count: u64 },
}

struct Series {
    name: String,
    kind: MetricKind,
    label_names: Vec<String>,
    vec: SeriesVec,
    written: DashSet<Vec<String>>,
}

/// Handle to one declared metric. Clones share the same underlying series.
#[derive(Clone)]
pub struct SeriesHandle {
    inner: Arc<Series>,
}

impl std::fmt::Debug for SeriesHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesHandle")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind.as_str())
            .field("labels", &self.inner.label_names)
            .finish()
    }
}

impl SeriesHandle {
    #[cfg(test)]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[cfg(test)]
    pub fn same_series(&self, other: &SeriesHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Adds `delta` to a counter or gauge. Counters reject negative deltas.
    pub fn increment(&self, labels: &[&str], delta: f64) -> Result<(), RegistryError> {
        match &self.inner.vec {
            SeriesVec::Counter(vec) => {
                if delta < 0.0 {
                    return Err(RegistryError::NegativeIncrement {
                        name: self.inner.name.clone(),
                        delta,
                    });
                }
                vec.get_metric_with_label_values(labels)?.inc_by(delta);
            }
            SeriesVec::Gauge(vec) => vec.get_metric_with_label_values(labels)?.add(delta),
            SeriesVec::Histogram(_) => return Err(self.wrong_kind("counter or gauge")),
        }
        self.mark_written(labels);
        Ok(())
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<(), RegistryError> {
        let SeriesVec::Gauge(vec) = &self.inner.vec else {
            return Err(self.wrong_kind("gauge"));
        };
        vec.get_metric_with_label_values(labels)?.set(value);
        self.mark_written(labels);
        Ok(())
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<(), RegistryError> {
        let SeriesVec::Histogram(vec) = &self.inner.vec else {
            return Err(self.wrong_kind("histogram"));
        };
        vec.get_metric_with_label_values(labels)?.observe(value);
        self.mark_written(labels);
        Ok(())
    }

    /// Current value of one label tuple, `None` if it was never written.
    pub(crate) fn sample(&self, labels: &[&str]) -> Option<Sample> {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        if !self.inner.written.contains(&key) {
            return None;
        }
        self.read_tuple(labels)
    }

    /// Current values of every label tuple written so far.
    pub(crate) fn samples(&self) -> Vec<Sample> {
        // collect keys first so no dashmap shard lock is held while reading
        let keys: Vec<Vec<String>> = self.inner.written.iter().map(|k| k.key().clone()).collect();
        keys.iter()
            .filter_map(|key| {
                let labels: Vec<&str> = key.iter().map(String::as_str).collect();
                self.read_tuple(&labels)
            })
            .collect()
    }

    fn read_tuple(&self, labels: &[&str]) -> Option<Sample> {
        match &self.inner.vec {
            SeriesVec::Counter(vec) => vec
                .get_metric_with_label_values(labels)
                .ok()
                .map(|c| Sample::Counter(c.get())),
            SeriesVec::Gauge(vec) => vec
                .get_metric_with_label_values(labels)
                .ok()
                .map(|g| Sample::Gauge(g.get())),
            SeriesVec::Histogram(vec) => vec.get_metric_with_label_values(labels).ok().map(|h| {
                Sample::Histogram {
                    sum: h.get_sample_sum(),
                    count: h.get_sample_count(),
                }
            }),
        }
    }

    fn mark_written(&self, labels: &[&str]) {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.inner.written.insert(key);
    }

    fn wrong_kind(&self, expected: &'static str) -> RegistryError {
        RegistryError::WrongKind {
            name: self.inner.name.clone(),
            expected,
            actual: self.inner.kind.as_str(),
        }
    }
}

/// Process-wide metric registry. Construct once and share by reference.
pub struct MetricRegistry {
    registry: Registry,
    series: DashMap<String, SeriesHandle>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            series: DashMap::new(),
        }
    }

    /// Declares a series, or returns the existing handle when `name` was
    /// already declared with the same kind and label names.
    pub fn declare(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<SeriesHandle, RegistryError> {
        match self.series.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let handle = existing.get();
                if handle.inner.kind == kind && handle.inner.label_names == label_names {
                    Ok(handle.clone())
                } else {
                    Err(RegistryError::Conflict {
                        name: name.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                let vec = match &kind {
                    MetricKind::Counter => {
                        let vec = CounterVec::new(Opts::new(name, help), label_names)?;
                        self.registry.register(Box::new(vec.clone()))?;
                        SeriesVec::Counter(vec)
                    }
                    MetricKind::Gauge => {
                        let vec = GaugeVec::new(Opts::new(name, help), label_names)?;
                        self.registry.register(Box::new(vec.clone()))?;
                        SeriesVec::Gauge(vec)
                    }
                    MetricKind::Histogram { buckets } => {
                        let opts = HistogramOpts::new(name, help).buckets(buckets.clone());
                        let vec = HistogramVec::new(opts, label_names)?;
                        self.registry.register(Box::new(vec.clone()))?;
                        SeriesVec::Histogram(vec)
                    }
                };
                let handle = SeriesHandle {
                    inner: Arc::new(Series {
                        name: name.to_string(),
                        kind,
                        label_names: label_names.iter().map(|l| l.to_string()).collect(),
                        vec,
                        written: DashSet::new(),
                    }),
                };
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<SeriesHandle> {
        self.series.get(name).map(|h| h.value().clone())
    }

    /// Renders every series in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, RegistryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| RegistryError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| RegistryError::Encoding(e.to_string()))
    }
}
