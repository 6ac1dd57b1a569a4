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

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use kairos_core::telemetry::metrics::{Metric, MetricId, MetricType, MetricsError, MetricsResult};
use serde::Serialize;

use crate::storage::backend::{BackendStats, MetricsBackend};

type Storage = HashMap<MetricId, Metric>;

/// The default metric store: a `RwLock`-guarded map.
///
/// Reads (snapshots, exports, handle `get`s) share the lock; updates take it
/// exclusively. A poisoned lock degrades reads to empty results and surfaces
/// as [`MetricsError::Storage`] on writes instead of panicking the caller.
#[derive(Debug)]
pub struct InMemoryBackend {
    storage: RwLock<Storage>,
}

/// One metric flattened for export.
#[derive(Debug, Serialize)]
struct MetricExport {
    id: String,
    kind: String,
    value: f64,
    sample_count: Option<usize>,
    description: String,
    unit: Option<String>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an empty backend sized for `capacity` metrics.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    fn read_guard(&self) -> MetricsResult<RwLockReadGuard<'_, Storage>> {
        self.storage
            .read()
            .map_err(|_| MetricsError::Storage("metric store read lock poisoned".to_string()))
    }

    fn write_guard(&self) -> MetricsResult<RwLockWriteGuard<'_, Storage>> {
        self.storage
            .write()
            .map_err(|_| MetricsError::Storage("metric store write lock poisoned".to_string()))
    }

    /// Shape breakdown of the stored metrics.
    pub fn get_stats(&self) -> BackendStats {
        match self.read_guard() {
            Ok(storage) => {
                let by_type = |wanted: MetricType| {
                    storage
                        .values()
                        .filter(|metric| metric.metric_type == wanted)
                        .count()
                };
                BackendStats {
                    total_metrics: storage.len(),
                    counter_count: by_type(MetricType::Counter),
                    gauge_count: by_type(MetricType::Gauge),
                    histogram_count: by_type(MetricType::Histogram),
                    // Rough figure; histogram sample vectors are not walked.
                    estimated_memory_bytes: (storage.len() + storage.capacity())
                        * std::mem::size_of::<(MetricId, Metric)>(),
                }
            }
            Err(_) => BackendStats {
                total_metrics: 0,
                counter_count: 0,
                gauge_count: 0,
                histogram_count: 0,
                estimated_memory_bytes: 0,
            },
        }
    }

    /// Metrics whose dot-scoped name starts with `prefix`.
    pub fn get_metrics_by_prefix(&self, prefix: &str) -> Vec<Metric> {
        self.read_guard()
            .map(|storage| {
                storage
                    .values()
                    .filter(|metric| metric.id.name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Metrics of one shape.
    pub fn get_metrics_by_type(&self, metric_type: MetricType) -> Vec<Metric> {
        self.read_guard()
            .map(|storage| {
                storage
                    .values()
                    .filter(|metric| metric.metric_type == metric_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inserts a batch under one lock acquisition.
    pub fn put_metrics(&self, metrics: Vec<Metric>) -> MetricsResult<()> {
        let mut storage = self.write_guard()?;
        for metric in metrics {
            storage.insert(metric.id.clone(), metric);
        }
        Ok(())
    }

    /// Removes every metric whose name starts with `prefix`; returns how
    /// many went away.
    pub fn remove_metrics_by_prefix(&self, prefix: &str) -> MetricsResult<usize> {
        let mut storage = self.write_guard()?;
        let before = storage.len();
        storage.retain(|id, _| !id.name.starts_with(prefix));
        Ok(before - storage.len())
    }

    /// Pretty-printed JSON of every stored metric, for collaborators that
    /// sample. Counters export their count, gauges their value, histograms
    /// their sample mean.
    pub fn export_json(&self) -> MetricsResult<String> {
        let exports: Vec<MetricExport> = self
            .list_all_metrics()
            .into_iter()
            .map(|metric| MetricExport {
                id: metric.id.to_string(),
                kind: metric.metric_type.to_string(),
                value: metric.value.as_f64(),
                sample_count: metric.value.histogram_count(),
                description: metric.metadata.description.clone(),
                unit: metric.metadata.unit.clone(),
            })
            .collect();

        serde_json::to_string_pretty(&exports)
            .map_err(|e| MetricsError::Storage(format!("JSON export failed: {e}")))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBackend for InMemoryBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn put_metric(&self, metric: Metric) -> MetricsResult<()> {
        self.write_guard()?.insert(metric.id.clone(), metric);
        Ok(())
    }

    fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        self.read_guard()?
            .get(id)
            .cloned()
            .ok_or_else(|| MetricsError::NotFound(id.clone()))
    }

    fn contains_metric(&self, id: &MetricId) -> bool {
        self.read_guard()
            .map(|storage| storage.contains_key(id))
            .unwrap_or(false)
    }

    fn remove_metric(&self, id: &MetricId) -> MetricsResult<()> {
        self.write_guard()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MetricsError::NotFound(id.clone()))
    }

    fn list_metric_ids(&self) -> Vec<MetricId> {
        self.read_guard()
            .map(|storage| storage.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn list_all_metrics(&self) -> Vec<Metric> {
        self.read_guard()
            .map(|storage| storage.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_all(&self) -> MetricsResult<()> {
        self.write_guard()?.clear();
        Ok(())
    }

    fn metric_count(&self) -> usize {
        self.read_guard().map(|storage| storage.len()).unwrap_or(0)
    }
}
