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

//! Fixed-size sample windows for in-loop statistics.
//!
//! The control loop needs rolling averages and trends without allocating in
//! the hot path, so samples live in stack-sized ring buffers. Heavier metric
//! storage for export is `kairos-telemetry`'s job.

use std::collections::HashMap;

use kairos_core::telemetry::MetricId;

/// Samples kept per window: two seconds of history at 60 Hz.
pub const SAMPLE_WINDOW: usize = 120;

/// A fixed-capacity ring of samples. Pushing beyond capacity overwrites the
/// oldest sample.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    buffer: [T; N],
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self {
            buffer: [T::default(); N],
            head: 0,
            len: 0,
        }
    }

    /// Appends a sample, evicting the oldest once the ring is full.
    pub fn push(&mut self, value: T) {
        self.buffer[self.head] = value;
        self.head = (self.head + 1) % N;
        if self.len < N {
            self.len += 1;
        }
    }

    /// Iterates samples oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        if self.len < N {
            // No wrap yet: samples sit in insertion order at the front.
            self.buffer[..self.len].iter().chain(self.buffer[..0].iter())
        } else {
            self.buffer[self.head..].iter().chain(self.buffer[..self.head].iter())
        }
    }

    /// The newest sample, if any.
    pub fn last(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let index = (self.head + N - 1) % N;
        Some(self.buffer[index])
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the ring holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed capacity of the ring.
    pub fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<f32, N> {
    /// Mean of the held samples, `0.0` when empty.
    pub fn average(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter().sum::<f32>() / self.len as f32
    }

    /// Smallest held sample.
    pub fn min(&self) -> Option<f32> {
        self.iter().copied().reduce(f32::min)
    }

    /// Largest held sample.
    pub fn max(&self) -> Option<f32> {
        self.iter().copied().reduce(f32::max)
    }

    /// Population variance of the held samples.
    pub fn variance(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let mean = self.average();
        self.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / self.len as f32
    }

    /// Mean of the newer half minus mean of the older half. Positive means
    /// the signal is rising.
    pub fn trend(&self) -> f32 {
        if self.len < 2 {
            return 0.0;
        }
        let split = self.len / 2;
        let older: f32 = self.iter().take(split).sum::<f32>() / split as f32;
        let newer_count = self.len - split;
        let newer: f32 = self.iter().skip(split).sum::<f32>() / newer_count as f32;
        newer - older
    }
}

/// Rolling sample windows keyed by metric id.
#[derive(Debug, Default)]
pub struct MetricStore {
    windows: HashMap<MetricId, RingBuffer<f32, SAMPLE_WINDOW>>,
}

impl MetricStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample under the given id, creating the window on first use.
    pub fn record(&mut self, id: MetricId, value: f32) {
        self.windows.entry(id).or_default().push(value);
    }

    /// The window for an id, if any sample was ever recorded.
    pub fn window(&self, id: &MetricId) -> Option<&RingBuffer<f32, SAMPLE_WINDOW>> {
        self.windows.get(id)
    }

    /// Rolling average for an id, `None` if never recorded.
    pub fn average(&self, id: &MetricId) -> Option<f32> {
        self.windows.get(id).map(|w| w.average())
    }

    /// Newest sample for an id.
    pub fn last(&self, id: &MetricId) -> Option<f32> {
        self.windows.get(id).and_then(|w| w.last())
    }

    /// Ids with at least one recorded sample.
    pub fn ids(&self) -> impl Iterator<Item = &MetricId> {
        self.windows.keys()
    }
}
