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

//! Holds the registered resource monitors and refreshes them as a group.

use std::sync::{Arc, Mutex};

use kairos_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use log::info;

/// Shared list of resource monitors.
///
/// Clones share the underlying list, so a registry handed to the telemetry
/// service and one kept by the caller see the same monitors.
#[derive(Debug, Clone)]
pub struct MonitorRegistry {
    monitors: Arc<Mutex<Vec<Arc<dyn ResourceMonitor>>>>,
}

impl MonitorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            monitors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds a monitor to the refresh set.
    pub fn register(&self, monitor: Arc<dyn ResourceMonitor>) {
        info!("resource monitor '{}' registered", monitor.monitor_id());
        self.monitors.lock().unwrap().push(monitor);
    }

    /// Refreshes every registered monitor in registration order.
    pub fn update_all(&self) {
        for monitor in self.monitors.lock().unwrap().iter() {
            monitor.update();
        }
    }

    /// A snapshot of the registered monitors.
    pub fn get_all_monitors(&self) -> Vec<Arc<dyn ResourceMonitor>> {
        self.monitors.lock().unwrap().clone()
    }

    /// Usage report from the first monitor watching the given resource.
    pub fn usage_report_for(
        &self,
        resource_type: MonitoredResourceType,
    ) -> Option<ResourceUsageReport> {
        self.monitors
            .lock()
            .unwrap()
            .iter()
            .find(|monitor| monitor.resource_type() == resource_type)
            .map(|monitor| monitor.usage_report())
    }

    /// How many monitors are registered.
    pub fn monitor_count(&self) -> usize {
        self.monitors.lock().unwrap().len()
    }
}

impl Default for MonitorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
