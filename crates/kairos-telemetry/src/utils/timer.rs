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

//! Scope timing that lands in a histogram without explicit bookkeeping.

use kairos_core::Stopwatch;
use log::warn;

use crate::metrics::registry::HistogramHandle;

/// Times a scope and records the elapsed milliseconds into a histogram
/// when dropped.
///
/// Dropping is what records, so early returns and unwinds are measured the
/// same as the straight-line path.
pub struct ScopedMetricTimer<'a> {
    stopwatch: Stopwatch,
    histogram: &'a HistogramHandle,
}

impl<'a> ScopedMetricTimer<'a> {
    /// Starts timing against the given histogram.
    pub fn new(histogram: &'a HistogramHandle) -> Self {
        Self {
            stopwatch: Stopwatch::new(),
            histogram,
        }
    }
}

impl<'a> Drop for ScopedMetricTimer<'a> {
    fn drop(&mut self) {
        if let Err(e) = self.histogram.observe(self.stopwatch.elapsed_ms()) {
            warn!("scoped timer could not record into {}: {e}", self.histogram.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::MetricsRegistry;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn drop_records_one_sample() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram(
                "kairos.subsystem.work_ms",
                "Scoped work timings",
                "ms",
                vec![1.0, 10.0, 100.0],
            )
            .unwrap();

        {
            let _timer = ScopedMetricTimer::new(&histogram);
            thread::sleep(Duration::from_millis(5));
        }

        let metric = histogram.get_metric().unwrap();
        assert_eq!(metric.value.histogram_count(), Some(1));
        assert!(metric.value.histogram_mean().unwrap() >= 5.0);
    }

    #[test]
    fn early_return_still_records() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .register_histogram(
                "kairos.subsystem.early_ms",
                "Scoped work timings",
                "ms",
                vec![1.0, 10.0],
            )
            .unwrap();

        fn guarded(histogram: &HistogramHandle, bail: bool) -> u32 {
            let _timer = ScopedMetricTimer::new(histogram);
            if bail {
                return 0;
            }
            1
        }

        guarded(&histogram, true);
        guarded(&histogram, false);

        let metric = histogram.get_metric().unwrap();
        assert_eq!(metric.value.histogram_count(), Some(2));
    }
}
