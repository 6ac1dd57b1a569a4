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

//! Bridges background samplers into the frame loop.
//!
//! Producers hold a cloned [`crossbeam_channel::Sender`] and use `try_send`;
//! the frame loop drains the bounded channel once per frame. A full channel
//! sheds the producer's sample instead of blocking either side.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use kairos_core::telemetry::ExternalSignal;
use log::trace;

/// Sliding window over which collection ticks are turned into a rate.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Receives [`ExternalSignal`]s from sampler threads and folds them into
/// the latest-known values the governor reads.
pub struct SignalHub {
    tx: Sender<ExternalSignal>,
    rx: Receiver<ExternalSignal>,
    last_memory_mb: f64,
    collection_times: VecDeque<Instant>,
    received: u64,
}

impl SignalHub {
    /// Creates a hub with a bounded channel of `buffer` slots.
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = bounded(buffer);
        Self {
            tx,
            rx,
            last_memory_mb: 0.0,
            collection_times: VecDeque::new(),
            received: 0,
        }
    }

    /// Hands out a sender for a producer thread.
    pub fn sender(&self) -> Sender<ExternalSignal> {
        self.tx.clone()
    }

    /// Drains every pending signal, stamping collection ticks with `now`.
    /// Returns how many signals were consumed.
    pub fn drain(&mut self, now: Instant) -> usize {
        let mut consumed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(ExternalSignal::MemorySample { used_mb }) => {
                    self.last_memory_mb = used_mb;
                    consumed += 1;
                }
                Ok(ExternalSignal::CollectionTick) => {
                    self.collection_times.push_back(now);
                    consumed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.prune(now);
        if consumed > 0 {
            self.received += consumed as u64;
            trace!("drained {consumed} external signals");
        }
        consumed
    }

    /// Latest reported memory footprint in MiB, 0 until the first sample.
    pub fn memory_mb(&self) -> f64 {
        self.last_memory_mb
    }

    /// Collection ticks per second over the last [`RATE_WINDOW`].
    pub fn collection_rate_hz(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.collection_times.len() as f64 / RATE_WINDOW.as_secs_f64()
    }

    /// Total signals consumed since construction.
    pub fn received(&self) -> u64 {
        self.received
    }

    fn prune(&mut self, now: Instant) {
        let horizon = now.checked_sub(RATE_WINDOW);
        if let Some(horizon) = horizon {
            while matches!(self.collection_times.front(), Some(&t) if t < horizon) {
                self.collection_times.pop_front();
            }
        }
    }
}
