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

//! # Kairos Core
//!
//! Shared contracts for the Kairos coordination layer: frame budget
//! accounting types, the prioritized runtime event model, the performance
//! pressure vocabulary, configuration profiles and telemetry primitives.
//!
//! This crate defines the *what* and stays free of policy. Arbitration,
//! batching and degradation decisions live in `kairos-control`; metric
//! collection machinery lives in `kairos-telemetry`.

#![warn(missing_docs)]

pub mod budget;
pub mod config;
pub mod event;
pub mod pressure;
pub mod telemetry;
pub mod utils;

pub use utils::timer::Stopwatch;
