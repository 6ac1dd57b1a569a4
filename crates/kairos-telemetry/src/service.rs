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

//! Frame-paced entry point that bundles the metrics registry with the
//! resource monitors and refreshes the monitors on a fixed cadence.

use std::time::{Duration, Instant};

use log::trace;

use crate::metrics::registry::MetricsRegistry;
use crate::monitoring::registry::MonitorRegistry;

/// Owns the metric and monitor registries and spaces out monitor refreshes.
///
/// `tick()` is meant to be called once per frame; refreshing `sysinfo`-backed
/// monitors every frame would be wasted work, so refreshes only run when the
/// configured interval has elapsed.
#[derive(Debug)]
pub struct TelemetryService {
    metrics: MetricsRegistry,
    monitors: MonitorRegistry,
    update_interval: Duration,
    last_update: Instant,
}

impl TelemetryService {
    /// Creates a service whose monitors refresh at most once per `update_interval`.
    pub fn new(update_interval: Duration) -> Self {
        Self {
            metrics: MetricsRegistry::new(),
            monitors: MonitorRegistry::new(),
            update_interval,
            last_update: Instant::now(),
        }
    }

    /// Refreshes every registered monitor if the interval has elapsed.
    /// Returns whether a refresh ran.
    pub fn tick(&mut self) -> bool {
        if self.last_update.elapsed() < self.update_interval {
            return false;
        }
        trace!("refreshing resource monitors");
        self.monitors.update_all();
        self.last_update = Instant::now();
        true
    }

    /// The metric registry backing counters, gauges and histograms.
    pub fn metrics_registry(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The registry of resource monitors refreshed by [`tick`](Self::tick).
    pub fn monitor_registry(&self) -> &MonitorRegistry {
        &self.monitors
    }
}

impl Default for TelemetryService {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
