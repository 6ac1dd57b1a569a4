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

//! Registration surface and the typed handles handed to call sites.

use std::sync::Arc;

use kairos_core::telemetry::metrics::{
    Metric, MetricId, MetricType, MetricsError, MetricsResult,
};

use crate::storage::{backend::MetricsBackend, memory_backend::InMemoryBackend};

/// Entry point for counters, gauges and histograms.
///
/// Registration hands out a cheap cloneable handle bound to the backing
/// store; the hot path updates through the handle without touching the
/// registry again. Registering an id that already exists with the same
/// shape is idempotent and returns a handle to the live metric, so counters
/// survive re-registration.
#[derive(Debug)]
pub struct MetricsRegistry {
    backend: Arc<dyn MetricsBackend>,
}

impl MetricsRegistry {
    /// Creates a registry over the default in-memory store.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
        }
    }

    /// Creates a registry over a caller-supplied store.
    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    /// Creates the metric unless the id already exists with the wanted
    /// shape; an existing id with a different shape is refused.
    fn ensure(
        &self,
        id: &MetricId,
        wanted: MetricType,
        build: impl FnOnce() -> Metric,
    ) -> MetricsResult<()> {
        match self.backend.get_metric(id) {
            Ok(existing) if existing.metric_type == wanted => Ok(()),
            Ok(existing) => Err(MetricsError::TypeMismatch {
                id: id.clone(),
                expected: wanted,
                found: existing.metric_type,
            }),
            Err(MetricsError::NotFound(_)) => self.backend.put_metric(build()),
            Err(e) => Err(e),
        }
    }

    fn memory(&self) -> Option<&InMemoryBackend> {
        self.backend.as_ref().as_any().downcast_ref::<InMemoryBackend>()
    }

    /// Registers a counter and returns its handle.
    pub fn register_counter(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> MetricsResult<CounterHandle> {
        let id = MetricId::new(name);
        let description = description.into();
        self.ensure(&id, MetricType::Counter, || {
            Metric::new_counter(id.clone(), description)
        })?;
        Ok(CounterHandle::new(id, Arc::clone(&self.backend)))
    }

    /// Registers a labeled counter and returns its handle.
    pub fn register_counter_with_labels(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        labels: Vec<(String, String)>,
    ) -> MetricsResult<CounterHandle> {
        let id = MetricId::with_labels(name, labels);
        let description = description.into();
        self.ensure(&id, MetricType::Counter, || {
            Metric::new_counter(id.clone(), description)
        })?;
        Ok(CounterHandle::new(id, Arc::clone(&self.backend)))
    }

    /// Registers a gauge and returns its handle.
    pub fn register_gauge(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> MetricsResult<GaugeHandle> {
        let id = MetricId::new(name);
        let description = description.into();
        let unit = unit.into();
        self.ensure(&id, MetricType::Gauge, || {
            let mut metric = Metric::new_gauge(id.clone(), description);
            metric.metadata.unit = Some(unit);
            metric
        })?;
        Ok(GaugeHandle::new(id, Arc::clone(&self.backend)))
    }

    /// Registers a labeled gauge and returns its handle.
    pub fn register_gauge_with_labels(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        labels: Vec<(String, String)>,
    ) -> MetricsResult<GaugeHandle> {
        let id = MetricId::with_labels(name, labels);
        let description = description.into();
        let unit = unit.into();
        self.ensure(&id, MetricType::Gauge, || {
            let mut metric = Metric::new_gauge(id.clone(), description);
            metric.metadata.unit = Some(unit);
            metric
        })?;
        Ok(GaugeHandle::new(id, Arc::clone(&self.backend)))
    }

    /// Registers a histogram with the given bucket upper bounds and returns
    /// its handle.
    pub fn register_histogram(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        buckets: Vec<f64>,
    ) -> MetricsResult<HistogramHandle> {
        let id = MetricId::new(name);
        let description = description.into();
        let unit = unit.into();
        self.ensure(&id, MetricType::Histogram, || {
            let mut metric = Metric::new_histogram(id.clone(), description, buckets);
            metric.metadata.unit = Some(unit);
            metric
        })?;
        Ok(HistogramHandle::new(id, Arc::clone(&self.backend)))
    }

    /// Fetches a metric by id.
    pub fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        self.backend.get_metric(id)
    }

    /// Whether a metric with this id exists.
    pub fn contains_metric(&self, id: &MetricId) -> bool {
        self.backend.contains_metric(id)
    }

    /// Metrics whose dot-scoped name starts with `prefix`.
    pub fn get_metrics_by_prefix(&self, prefix: &str) -> Vec<Metric> {
        match self.memory() {
            // The in-memory store filters under its own lock.
            Some(backend) => backend.get_metrics_by_prefix(prefix),
            None => self
                .backend
                .list_all_metrics()
                .into_iter()
                .filter(|metric| metric.id.name.starts_with(prefix))
                .collect(),
        }
    }

    /// Every registered counter.
    pub fn get_all_counters(&self) -> Vec<Metric> {
        match self.memory() {
            Some(backend) => backend.get_metrics_by_type(MetricType::Counter),
            None => self
                .backend
                .list_all_metrics()
                .into_iter()
                .filter(|metric| metric.metric_type == MetricType::Counter)
                .collect(),
        }
    }

    /// Every registered gauge.
    pub fn get_all_gauges(&self) -> Vec<Metric> {
        match self.memory() {
            Some(backend) => backend.get_metrics_by_type(MetricType::Gauge),
            None => self
                .backend
                .list_all_metrics()
                .into_iter()
                .filter(|metric| metric.metric_type == MetricType::Gauge)
                .collect(),
        }
    }

    /// How many metrics are registered.
    pub fn metric_count(&self) -> usize {
        self.backend.metric_count()
    }

    /// Drops every registered metric.
    pub fn clear_all(&self) -> MetricsResult<()> {
        self.backend.clear_all()
    }

    /// The backing store, for backend-specific operations such as export.
    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap handle for updating one counter.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl CounterHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Adds one; returns the new count.
    pub fn increment(&self) -> MetricsResult<u64> {
        self.backend.increment_counter(&self.id, 1)
    }

    /// Adds `amount`; returns the new count.
    pub fn increment_by(&self, amount: u64) -> MetricsResult<u64> {
        self.backend.increment_counter(&self.id, amount)
    }

    /// Reads the current count.
    pub fn get(&self) -> MetricsResult<u64> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_counter()
            .ok_or_else(|| MetricsError::TypeMismatch {
                id: self.id.clone(),
                expected: MetricType::Counter,
                found: metric.value.metric_type(),
            })
    }

    /// The id this handle updates.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Cheap handle for updating one gauge.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl GaugeHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Replaces the gauge value.
    pub fn set(&self, value: f64) -> MetricsResult<()> {
        self.backend.set_gauge(&self.id, value)
    }

    /// Shifts the gauge by `delta`; returns the new value.
    pub fn add(&self, delta: f64) -> MetricsResult<f64> {
        let updated = self.get()? + delta;
        self.set(updated)?;
        Ok(updated)
    }

    /// Shifts the gauge by `-delta`; returns the new value.
    pub fn sub(&self, delta: f64) -> MetricsResult<f64> {
        self.add(-delta)
    }

    /// Reads the current value.
    pub fn get(&self) -> MetricsResult<f64> {
        let metric = self.backend.get_metric(&self.id)?;
        metric
            .value
            .as_gauge()
            .ok_or_else(|| MetricsError::TypeMismatch {
                id: self.id.clone(),
                expected: MetricType::Gauge,
                found: metric.value.metric_type(),
            })
    }

    /// The id this handle updates.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Cheap handle for recording into one histogram.
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    id: MetricId,
    backend: Arc<dyn MetricsBackend>,
}

impl HistogramHandle {
    fn new(id: MetricId, backend: Arc<dyn MetricsBackend>) -> Self {
        Self { id, backend }
    }

    /// Records one sample.
    pub fn observe(&self, value: f64) -> MetricsResult<()> {
        self.backend.record_histogram_sample(&self.id, value)
    }

    /// Fetches the full histogram metric for inspection.
    pub fn get_metric(&self) -> MetricsResult<Metric> {
        self.backend.get_metric(&self.id)
    }

    /// The id this handle records under.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}
