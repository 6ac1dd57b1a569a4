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

//! A lightweight typed channel for streaming coordination events
//! (degradation notices, shutdown requests) out of the control loop.

use flume::{Receiver, Sender};

/// An unbounded typed channel with a held receiver.
///
/// The channel keeps one receiver alive for its whole lifetime, so sends
/// never fail with a disconnect while the channel exists. Receivers obtained
/// from [`receiver`](EventChannel::receiver) compete for messages; this is a
/// work queue, not a broadcast.
pub struct EventChannel<T: Clone + Send + Sync + 'static> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> EventChannel<T> {
    /// Creates a new unbounded channel.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// Sends a value into the channel.
    pub fn send(&self, value: T) -> Result<(), flume::SendError<T>> {
        self.sender.send(value)
    }

    /// Returns a sender handle for producers on other call paths.
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    /// Returns a receiver handle for the consumer side.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns whether the channel currently holds no values.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
