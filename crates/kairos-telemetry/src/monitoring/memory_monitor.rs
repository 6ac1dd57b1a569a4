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

//! sysinfo-based memory monitor and the background sampler that feeds its
//! readings into the coordination loop.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kairos_core::telemetry::monitoring::{
    MemoryReport, MonitoredResourceType, ResourceMonitor, ResourceUsageReport,
};
use kairos_core::telemetry::ExternalSignal;
use log::{debug, warn};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Memory monitor backed by the `sysinfo` crate.
///
/// Tracks the resident memory of this process alongside system-wide usage.
/// Interior mutability keeps the monitor shareable behind `Arc` across the
/// sampler thread and the frame loop.
pub struct MemoryMonitor {
    id: String,
    system: Mutex<System>,
    pid: Option<Pid>,
    peak_process_bytes: Mutex<u64>,
    last_report: Mutex<Option<MemoryReport>>,
    sample_count: Mutex<u64>,
}

impl MemoryMonitor {
    pub fn new(id: String) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("current pid unavailable, process memory will read 0: {e}");
                None
            }
        };
        Self {
            id,
            system: Mutex::new(System::new()),
            pid,
            peak_process_bytes: Mutex::new(0),
            last_report: Mutex::new(None),
            sample_count: Mutex::new(0),
        }
    }

    /// Returns the latest detailed memory report.
    pub fn memory_report(&self) -> Option<MemoryReport> {
        *self.last_report.lock().unwrap()
    }

    /// Resets the peak tracker to the most recent process reading.
    pub fn reset_peak(&self) {
        let current = self
            .memory_report()
            .map(|report| report.process_bytes)
            .unwrap_or(0);
        *self.peak_process_bytes.lock().unwrap() = current;
    }

    /// Refreshes platform counters and rebuilds the report.
    fn refresh(&self) {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();

        let process_bytes = match self.pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            None => 0,
        };

        let mut peak = self.peak_process_bytes.lock().unwrap();
        if process_bytes > *peak {
            *peak = process_bytes;
        }

        let mut count = self.sample_count.lock().unwrap();
        *count += 1;

        let report = MemoryReport {
            process_bytes,
            process_peak_bytes: *peak,
            system_used_bytes: system.used_memory(),
            system_total_bytes: system.total_memory(),
            sample_count: *count,
        };
        *self.last_report.lock().unwrap() = Some(report);
    }
}

impl fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("last_report", &self.last_report)
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor for MemoryMonitor {
    fn monitor_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::ProcessMemory
    }

    fn usage_report(&self) -> ResourceUsageReport {
        let report = self.memory_report();
        ResourceUsageReport {
            resource_type: MonitoredResourceType::ProcessMemory,
            current_usage_bytes: report.map(|r| r.process_bytes).unwrap_or(0),
            peak_usage_bytes: Some(*self.peak_process_bytes.lock().unwrap()),
            total_available_bytes: report.map(|r| r.system_total_bytes),
        }
    }

    fn update(&self) {
        self.refresh();
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Stops the sampler thread when dropped or via [`stop`](SamplerHandle::stop).
pub struct SamplerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Signals the sampler to stop and waits for its thread to finish.
    pub fn stop(mut self) {
        self.shut_down();
    }

    fn shut_down(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("memory sampler thread panicked");
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shut_down();
    }
}

/// Spawns a background thread that refreshes `monitor` every `interval` and
/// hands each reading to `emit` as an [`ExternalSignal::MemorySample`].
///
/// `emit` typically pushes into a bounded channel with `try_send`; when the
/// consumer falls behind, the freshest sample wins and older ones are shed
/// on the producer side.
pub fn spawn_sampler(
    monitor: Arc<dyn ResourceMonitor>,
    interval: Duration,
    mut emit: impl FnMut(ExternalSignal) + Send + 'static,
) -> SamplerHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let thread = thread::spawn(move || {
        debug!(
            "memory sampler started for {} at {:.0} ms",
            monitor.monitor_id(),
            interval.as_secs_f64() * 1000.0
        );
        while flag.load(Ordering::Relaxed) {
            monitor.update();
            let used_mb = monitor.usage_report().current_usage_mb();
            emit(ExternalSignal::MemorySample { used_mb });
            thread::sleep(interval);
        }
        debug!("memory sampler stopped for {}", monitor.monitor_id());
    });
    SamplerHandle {
        running,
        thread: Some(thread),
    }
}
