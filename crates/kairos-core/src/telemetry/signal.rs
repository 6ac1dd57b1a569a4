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

//! Signals produced by telemetry sources outside the control loop.
//!
//! Producers (sampler threads, embedded runtimes) push these into a bounded
//! channel; the coordinator drains them at the frame boundary. Producers use
//! `try_send` and shed the sample when the channel is full, so a stalled
//! consumer never blocks a producer thread.

/// One piece of telemetry from outside the frame loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExternalSignal {
    /// A fresh memory footprint sample for this process.
    MemorySample {
        /// Resident memory in mebibytes.
        used_mb: f64,
    },
    /// An embedded runtime (scripting VM, asset cache) finished a
    /// collection or sweep cycle.
    CollectionTick,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_compare_by_content() {
        assert_eq!(
            ExternalSignal::MemorySample { used_mb: 128.0 },
            ExternalSignal::MemorySample { used_mb: 128.0 }
        );
        assert_ne!(
            ExternalSignal::MemorySample { used_mb: 128.0 },
            ExternalSignal::CollectionTick
        );
    }
}
