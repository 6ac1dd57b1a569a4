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

//! Resource monitoring contracts: the monitor trait and its reports.
//!
//! Monitors wrap a platform source (process memory, system memory) behind a
//! uniform interface so the telemetry service can poll them without knowing
//! what sits underneath.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// The kind of resource a monitor watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredResourceType {
    /// Memory owned by this process.
    ProcessMemory,
    /// Memory used by the whole system.
    SystemRam,
}

impl fmt::Display for MonitoredResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The uniform usage report every monitor can produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsageReport {
    /// What resource the numbers describe.
    pub resource_type: MonitoredResourceType,
    /// Current usage in bytes.
    pub current_usage_bytes: u64,
    /// Highest usage observed since the monitor started, when tracked.
    pub peak_usage_bytes: Option<u64>,
    /// Total capacity of the resource, when the platform exposes it.
    pub total_available_bytes: Option<u64>,
}

impl ResourceUsageReport {
    /// Current usage in mebibytes.
    pub fn current_usage_mb(&self) -> f64 {
        self.current_usage_bytes as f64 / BYTES_PER_MIB
    }

    /// Peak usage in mebibytes, when tracked.
    pub fn peak_usage_mb(&self) -> Option<f64> {
        self.peak_usage_bytes.map(|b| b as f64 / BYTES_PER_MIB)
    }
}

/// A detailed memory report combining process and system views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReport {
    /// Resident memory of this process, in bytes.
    pub process_bytes: u64,
    /// Highest process residency observed, in bytes.
    pub process_peak_bytes: u64,
    /// Memory in use across the whole system, in bytes.
    pub system_used_bytes: u64,
    /// Total system memory, in bytes.
    pub system_total_bytes: u64,
    /// How many samples went into this report.
    pub sample_count: u64,
}

impl MemoryReport {
    /// Process residency in mebibytes.
    pub fn process_mb(&self) -> f64 {
        self.process_bytes as f64 / BYTES_PER_MIB
    }

    /// Peak process residency in mebibytes.
    pub fn process_peak_mb(&self) -> f64 {
        self.process_peak_bytes as f64 / BYTES_PER_MIB
    }

    /// System usage in mebibytes.
    pub fn system_used_mb(&self) -> f64 {
        self.system_used_bytes as f64 / BYTES_PER_MIB
    }

    /// Fraction of system memory in use, in `[0, 1]`.
    pub fn pressure_ratio(&self) -> f64 {
        if self.system_total_bytes == 0 {
            return 0.0;
        }
        self.system_used_bytes as f64 / self.system_total_bytes as f64
    }

    /// Coarse pressure classification for logs and overlays.
    pub fn pressure_label(&self) -> &'static str {
        let ratio = self.pressure_ratio();
        if ratio < 0.5 {
            "low"
        } else if ratio < 0.75 {
            "moderate"
        } else if ratio < 0.9 {
            "high"
        } else {
            "critical"
        }
    }
}

/// A pollable source of resource usage.
///
/// Implementations are shared across threads behind `Arc`, so interior
/// mutability is on the implementor. `update` is a no-op by default for
/// monitors whose platform source refreshes itself.
pub trait ResourceMonitor: Send + Sync + fmt::Debug + 'static {
    /// Stable identifier for logs and registries.
    fn monitor_id(&self) -> Cow<'_, str>;

    /// The resource this monitor watches.
    fn resource_type(&self) -> MonitoredResourceType;

    /// Produces the current usage numbers.
    fn usage_report(&self) -> ResourceUsageReport;

    /// Refreshes the underlying platform source.
    fn update(&self) {}

    /// Downcast hook for monitor-specific accessors.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_converts_to_mebibytes() {
        let report = ResourceUsageReport {
            resource_type: MonitoredResourceType::ProcessMemory,
            current_usage_bytes: 256 * 1024 * 1024,
            peak_usage_bytes: Some(512 * 1024 * 1024),
            total_available_bytes: None,
        };
        assert!((report.current_usage_mb() - 256.0).abs() < 0.001);
        assert!((report.peak_usage_mb().unwrap() - 512.0).abs() < 0.001);
    }

    #[test]
    fn pressure_label_follows_ratio() {
        let mut report = MemoryReport {
            process_bytes: 0,
            process_peak_bytes: 0,
            system_used_bytes: 4,
            system_total_bytes: 10,
            sample_count: 1,
        };
        assert_eq!(report.pressure_label(), "low");
        report.system_used_bytes = 6;
        assert_eq!(report.pressure_label(), "moderate");
        report.system_used_bytes = 8;
        assert_eq!(report.pressure_label(), "high");
        report.system_used_bytes = 10;
        assert_eq!(report.pressure_label(), "critical");
    }

    #[test]
    fn zero_capacity_reads_as_no_pressure() {
        let report = MemoryReport {
            process_bytes: 100,
            process_peak_bytes: 100,
            system_used_bytes: 100,
            system_total_bytes: 0,
            sample_count: 1,
        };
        assert_eq!(report.pressure_ratio(), 0.0);
        assert_eq!(report.pressure_label(), "low");
    }
}
