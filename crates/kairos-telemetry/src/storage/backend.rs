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

use std::fmt::Debug;

use kairos_core::telemetry::{
    metrics::MetricType, Metric, MetricId, MetricValue, MetricsError, MetricsResult,
};

/// Storage seam between the registry and whatever holds the metrics.
///
/// The registry and the typed handles only ever talk to this trait, so a
/// store other than the in-memory map (a shared-memory segment, a test
/// double) plugs in without touching the callers. Implementors provide the
/// primitive get/put surface; the typed update helpers are derived from it.
pub trait MetricsBackend: Send + Sync + Debug + 'static {
    /// Concrete-type escape hatch for backend-specific operations.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Inserts or replaces a metric under its id.
    fn put_metric(&self, metric: Metric) -> MetricsResult<()>;

    /// Fetches a metric by id.
    fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric>;

    /// Whether a metric with this id exists.
    fn contains_metric(&self, id: &MetricId) -> bool;

    /// Removes a metric; `NotFound` if the id is absent.
    fn remove_metric(&self, id: &MetricId) -> MetricsResult<()>;

    /// Ids of every stored metric, in no particular order.
    fn list_metric_ids(&self) -> Vec<MetricId>;

    /// Clones out every stored metric.
    fn list_all_metrics(&self) -> Vec<Metric>;

    /// Drops every stored metric.
    fn clear_all(&self) -> MetricsResult<()>;

    /// How many metrics are stored.
    fn metric_count(&self) -> usize;

    /// Adds `delta` to a counter, saturating at `u64::MAX`, and returns the
    /// new count. `TypeMismatch` if the id names a non-counter.
    fn increment_counter(&self, id: &MetricId, delta: u64) -> MetricsResult<u64> {
        let mut metric = self.get_metric(id)?;
        let updated = match &mut metric.value {
            MetricValue::Counter(count) => {
                *count = count.saturating_add(delta);
                *count
            }
            other => {
                return Err(MetricsError::TypeMismatch {
                    id: id.clone(),
                    expected: MetricType::Counter,
                    found: other.metric_type(),
                })
            }
        };
        metric.metadata.touch();
        self.put_metric(metric)?;
        Ok(updated)
    }

    /// Replaces a gauge's value. `TypeMismatch` if the id names a non-gauge.
    fn set_gauge(&self, id: &MetricId, value: f64) -> MetricsResult<()> {
        let mut metric = self.get_metric(id)?;
        match &mut metric.value {
            MetricValue::Gauge(current) => *current = value,
            other => {
                return Err(MetricsError::TypeMismatch {
                    id: id.clone(),
                    expected: MetricType::Gauge,
                    found: other.metric_type(),
                })
            }
        }
        metric.metadata.touch();
        self.put_metric(metric)
    }

    /// Appends a sample to a histogram and updates its bucket counts.
    /// `TypeMismatch` if the id names a non-histogram.
    fn record_histogram_sample(&self, id: &MetricId, sample: f64) -> MetricsResult<()> {
        let mut metric = self.get_metric(id)?;
        match &mut metric.value {
            MetricValue::Histogram {
                samples,
                bucket_bounds,
                bucket_counts,
            } => {
                samples.push(sample);

                // Buckets are cumulative; the extra last slot catches
                // samples above every bound.
                let mut bucketed = false;
                for (slot, &bound) in bucket_bounds.iter().enumerate() {
                    if sample <= bound {
                        bucket_counts[slot] += 1;
                        bucketed = true;
                    }
                }
                if !bucketed {
                    if let Some(overflow) = bucket_counts.last_mut() {
                        *overflow += 1;
                    }
                }
            }
            other => {
                return Err(MetricsError::TypeMismatch {
                    id: id.clone(),
                    expected: MetricType::Histogram,
                    found: other.metric_type(),
                })
            }
        }
        metric.metadata.touch();
        self.put_metric(metric)
    }
}

/// Shape breakdown of a backend's contents.
#[derive(Debug, Clone)]
pub struct BackendStats {
    /// Metrics stored, all shapes.
    pub total_metrics: usize,
    /// Counters among them.
    pub counter_count: usize,
    /// Gauges among them.
    pub gauge_count: usize,
    /// Histograms among them.
    pub histogram_count: usize,
    /// Rough in-memory footprint.
    pub estimated_memory_bytes: usize,
}
