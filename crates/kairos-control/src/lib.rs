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

//! # Kairos Control
//!
//! Runtime coordination for frame-budgeted hosts: per-frame time budget
//! arbitration, a priority event bus with backpressure and a circuit
//! breaker, and a governor that walks the degradation ladder when frames
//! go unhealthy.

pub mod budget;
pub mod bus;
pub mod coordinator;
pub mod governor;
pub mod metrics;
pub mod signal;

pub use budget::FrameBudgetManager;
pub use bus::PriorityEventBus;
pub use coordinator::FrameCoordinator;
pub use governor::PerformanceGovernor;
