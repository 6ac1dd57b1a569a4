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

//! Telemetry contracts shared between the control loop and the collection
//! crates: metric primitives, resource monitoring traits and the external
//! signal vocabulary.

pub mod metrics;
pub mod monitoring;
pub mod signal;

pub use metrics::{
    Metric, MetricId, MetricMetadata, MetricType, MetricValue, MetricsError, MetricsResult,
};
pub use monitoring::{
    MemoryReport, MonitoredResourceType, ResourceMonitor, ResourceUsageReport,
};
pub use signal::ExternalSignal;
