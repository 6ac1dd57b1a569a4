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

//! Monotonic timing helpers used for frame and handler measurement.

use std::time::{Duration, Instant};

/// A simple monotonic stopwatch.
///
/// Starts running the moment it is created. Budget accounting works in
/// fractional milliseconds, so [`elapsed_ms`](Stopwatch::elapsed_ms) is the
/// accessor most call sites want.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    /// Creates a stopwatch that starts counting immediately.
    #[inline]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Resets the stopwatch to zero and keeps it running.
    #[inline]
    pub fn restart(&mut self) {
        self.started_at = Instant::now();
    }

    /// Returns the elapsed time since creation or the last restart.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the elapsed time in fractional milliseconds.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the elapsed time in fractional seconds.
    #[inline]
    pub fn elapsed_secs_f64(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
