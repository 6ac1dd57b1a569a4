// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metric primitives: identifiers, values and the metric record itself.
//!
//! Counters count deliveries and rejections, gauges track queue depths and
//! pressure state, histograms hold frame and handler timings. Storage and
//! registration live in `kairos-telemetry`.

use std::fmt;
use std::time::Instant;

/// Identifies a metric by name plus optional `(key, value)` labels.
///
/// Names are dot-scoped by convention, e.g. `kairos.bus.delivered_events` or
/// `kairos.budget.rejections` with a `subsystem` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricId {
    /// Dot-scoped metric name.
    pub name: String,
    /// Label pairs, kept sorted by key for stable identity.
    pub labels: Vec<(String, String)>,
}

impl MetricId {
    /// Creates an unlabeled metric id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    /// Creates a metric id with one label.
    pub fn with_label(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::with_labels(name, vec![(key.into(), value.into())])
    }

    /// Creates a metric id with a set of labels.
    pub fn with_labels(name: impl Into<String>, mut labels: Vec<(String, String)>) -> Self {
        labels.sort();
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            write!(f, "{{")?;
            for (i, (key, value)) in self.labels.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{key}=\"{value}\"")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// The shape of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Monotonically increasing count.
    Counter,
    /// Point-in-time value that can move both ways.
    Gauge,
    /// Distribution of samples over fixed bucket bounds.
    Histogram,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The current value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Monotonic count.
    Counter(u64),
    /// Last set value.
    Gauge(f64),
    /// Recorded samples with cumulative bucket counts. `bucket_counts` has
    /// one more entry than `bucket_bounds`: the overflow bucket.
    Histogram {
        /// Every recorded sample, in arrival order.
        samples: Vec<f64>,
        /// Upper bounds of the buckets, ascending.
        bucket_bounds: Vec<f64>,
        /// Samples at or below each bound, plus the overflow bucket.
        bucket_counts: Vec<u64>,
    },
}

impl MetricValue {
    /// The shape this value belongs to.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Histogram { .. } => MetricType::Histogram,
        }
    }

    /// Collapses the value to a single `f64` where that makes sense.
    /// Histograms collapse to their sample mean.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
            MetricValue::Histogram { samples, .. } => {
                if samples.is_empty() {
                    0.0
                } else {
                    samples.iter().sum::<f64>() / samples.len() as f64
                }
            }
        }
    }

    /// Counter value, if this is a counter.
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// Gauge value, if this is a gauge.
    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            _ => None,
        }
    }

    /// Number of recorded samples, if this is a histogram.
    pub fn histogram_count(&self) -> Option<usize> {
        match self {
            MetricValue::Histogram { samples, .. } => Some(samples.len()),
            _ => None,
        }
    }

    /// Mean of recorded samples, if this is a non-empty histogram.
    pub fn histogram_mean(&self) -> Option<f64> {
        match self {
            MetricValue::Histogram { samples, .. } if !samples.is_empty() => {
                Some(samples.iter().sum::<f64>() / samples.len() as f64)
            }
            _ => None,
        }
    }
}

/// Descriptive fields attached to a metric at registration.
#[derive(Debug, Clone)]
pub struct MetricMetadata {
    /// What the metric measures.
    pub description: String,
    /// Unit of the value, e.g. `"ms"` or `"events"`.
    pub unit: Option<String>,
    /// When the metric was registered.
    pub created_at: Instant,
    /// When the value last changed.
    pub updated_at: Instant,
}

impl MetricMetadata {
    /// Creates metadata with the given description and no unit.
    pub fn new(description: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            description: description.into(),
            unit: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Marks the metric as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Instant::now();
    }
}

/// A metric record: identity, shape, value and metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Identity within the backend.
    pub id: MetricId,
    /// Shape, fixed at registration.
    pub metric_type: MetricType,
    /// Current value.
    pub value: MetricValue,
    /// Descriptive fields.
    pub metadata: MetricMetadata,
}

impl Metric {
    /// Creates a counter starting at zero.
    pub fn new_counter(id: MetricId, description: impl Into<String>) -> Self {
        Self {
            id,
            metric_type: MetricType::Counter,
            value: MetricValue::Counter(0),
            metadata: MetricMetadata::new(description),
        }
    }

    /// Creates a gauge starting at zero.
    pub fn new_gauge(id: MetricId, description: impl Into<String>) -> Self {
        Self {
            id,
            metric_type: MetricType::Gauge,
            value: MetricValue::Gauge(0.0),
            metadata: MetricMetadata::new(description),
        }
    }

    /// Creates an empty histogram over the given ascending bucket bounds.
    pub fn new_histogram(
        id: MetricId,
        description: impl Into<String>,
        bucket_bounds: Vec<f64>,
    ) -> Self {
        let bucket_counts = vec![0; bucket_bounds.len() + 1];
        Self {
            id,
            metric_type: MetricType::Histogram,
            value: MetricValue::Histogram {
                samples: Vec::new(),
                bucket_bounds,
                bucket_counts,
            },
            metadata: MetricMetadata::new(description),
        }
    }
}

/// Errors from metric storage and registration.
#[derive(Debug)]
pub enum MetricsError {
    /// No metric is registered under the id.
    NotFound(MetricId),
    /// A metric exists under the id but with a different shape.
    TypeMismatch {
        /// The id in question.
        id: MetricId,
        /// Shape the caller asked for.
        expected: MetricType,
        /// Shape actually registered.
        found: MetricType,
    },
    /// The backend could not complete the operation.
    Storage(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::NotFound(id) => write!(f, "metric not found: {id}"),
            MetricsError::TypeMismatch {
                id,
                expected,
                found,
            } => {
                write!(f, "metric {id} is a {found}, expected a {expected}")
            }
            MetricsError::Storage(reason) => write!(f, "metric storage error: {reason}"),
        }
    }
}

impl std::error::Error for MetricsError {}

/// Convenience alias for metric operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
