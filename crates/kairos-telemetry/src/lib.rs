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

//! # Kairos Telemetry
//!
//! Metric storage and registration, resource monitoring, and the service
//! that ties them together for the coordination runtime. `kairos-core`
//! defines the contracts; this crate provides the in-memory backend, the
//! registries, the sysinfo-backed memory monitor and its background
//! sampler.

pub mod metrics;
pub mod monitoring;
pub mod service;
pub mod storage;
pub mod utils;

pub use metrics::registry::MetricsRegistry;
pub use monitoring::memory_monitor::{spawn_sampler, MemoryMonitor, SamplerHandle};
pub use monitoring::registry::MonitorRegistry;
pub use service::TelemetryService;
pub use storage::memory_backend::InMemoryBackend;
pub use utils::timer::ScopedMetricTimer;
