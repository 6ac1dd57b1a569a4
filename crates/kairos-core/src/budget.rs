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

//! Frame budget accounting types.
//!
//! A frame has a fixed total time budget (16.7 ms at 60 Hz by default) that
//! the registered subsystems draw reservations from. These types are the
//! ledger; the arbitration policy lives in `kairos-control`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Tolerance applied to budget comparisons to absorb accumulated
/// floating-point error in millisecond arithmetic.
pub const BUDGET_EPSILON_MS: f64 = 1e-9;

/// The fixed set of subsystems that draw from the frame budget.
///
/// The set is closed: budget arbitration only makes sense between parties
/// known at compile time. Enum discriminants double as ledger indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubsystemId {
    /// Widget layout, input routing and interface painting.
    InteractiveLayer,
    /// World state advancement.
    SimulationLayer,
    /// Draining the prioritized event bus.
    EventProcessing,
    /// Bookkeeping of the coordination layer itself.
    RuntimeOverhead,
}

impl SubsystemId {
    /// All subsystems, in ledger order.
    pub const ALL: [SubsystemId; 4] = [
        SubsystemId::InteractiveLayer,
        SubsystemId::SimulationLayer,
        SubsystemId::EventProcessing,
        SubsystemId::RuntimeOverhead,
    ];

    /// Stable string label, used in logs and metric names.
    pub fn label(&self) -> &'static str {
        match self {
            SubsystemId::InteractiveLayer => "interactive-layer",
            SubsystemId::SimulationLayer => "simulation-layer",
            SubsystemId::EventProcessing => "event-processing",
            SubsystemId::RuntimeOverhead => "runtime-overhead",
        }
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Snapshot of one frame's budget ledger.
///
/// While no overrun has been recorded, `total_ms` equals the sum of all
/// grants plus `remaining_ms` (up to [`BUDGET_EPSILON_MS`]). Actual-usage
/// reconciliation is the only path that may push `remaining_ms` negative;
/// reservations alone never do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameBudget {
    /// Monotonic frame counter.
    pub frame_id: u64,
    /// Total time available this frame, in milliseconds.
    pub total_ms: f64,
    /// Unreserved time left this frame, in milliseconds.
    pub remaining_ms: f64,
    /// Set once reconciled usage has pushed the frame past its total.
    pub overrun: bool,
    /// Reserved time per subsystem, indexed by [`SubsystemId`] order.
    pub granted_ms: [f64; 4],
    /// Reconciled actual usage per subsystem, indexed by [`SubsystemId`] order.
    pub actual_ms: [f64; 4],
}

impl FrameBudget {
    /// Creates a fresh, untouched ledger for the given frame.
    pub fn fresh(frame_id: u64, total_ms: f64) -> Self {
        Self {
            frame_id,
            total_ms,
            remaining_ms: total_ms,
            overrun: false,
            granted_ms: [0.0; 4],
            actual_ms: [0.0; 4],
        }
    }

    /// Time reserved by the given subsystem this frame.
    pub fn granted_for(&self, subsystem: SubsystemId) -> f64 {
        self.granted_ms[subsystem as usize]
    }

    /// Reconciled usage reported by the given subsystem this frame.
    pub fn actual_for(&self, subsystem: SubsystemId) -> f64 {
        self.actual_ms[subsystem as usize]
    }

    /// Sum of all reservations this frame.
    pub fn granted_total_ms(&self) -> f64 {
        self.granted_ms.iter().sum()
    }

    /// Total time used beyond grants, summed over subsystems.
    pub fn overshoot_total_ms(&self) -> f64 {
        SubsystemId::ALL
            .iter()
            .map(|&s| (self.actual_for(s) - self.granted_for(s)).max(0.0))
            .sum()
    }
}

/// Budget sizing, loaded from a configuration profile or defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total frame budget in milliseconds. Defaults to a 60 Hz frame.
    pub total_ms: f64,
    /// Advisory per-subsystem slices, indexed by [`SubsystemId`] order.
    /// Adapters use these to size their reservation requests; the arbiter
    /// itself only enforces the total.
    pub split_ms: [f64; 4],
}

impl BudgetConfig {
    /// Advisory slice for the given subsystem.
    pub fn split_for(&self, subsystem: SubsystemId) -> f64 {
        self.split_ms[subsystem as usize]
    }

    /// Checks that the profile is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.total_ms.is_finite() || self.total_ms <= 0.0 {
            return Err(ConfigError::NonPositiveBudget {
                total_ms: self.total_ms,
            });
        }
        for (&slice, &subsystem) in self.split_ms.iter().zip(SubsystemId::ALL.iter()) {
            if !slice.is_finite() || slice < 0.0 {
                return Err(ConfigError::NegativeSlice {
                    subsystem: subsystem.label(),
                    value_ms: slice,
                });
            }
        }
        let split_total: f64 = self.split_ms.iter().sum();
        if split_total > self.total_ms + BUDGET_EPSILON_MS {
            return Err(ConfigError::SplitExceedsTotal {
                split_ms: split_total,
                total_ms: self.total_ms,
            });
        }
        Ok(())
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_ms: 16.7,
            // interactive, simulation, events, overhead; sums to the total.
            split_ms: [6.0, 6.0, 2.7, 2.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_budget_is_fully_available() {
        let budget = FrameBudget::fresh(7, 16.7);
        assert_eq!(budget.frame_id, 7);
        assert!((budget.remaining_ms - 16.7).abs() < 0.001);
        assert!(!budget.overrun);
        assert_eq!(budget.granted_total_ms(), 0.0);
        assert_eq!(budget.overshoot_total_ms(), 0.0);
    }

    #[test]
    fn subsystem_labels_are_stable() {
        assert_eq!(SubsystemId::InteractiveLayer.label(), "interactive-layer");
        assert_eq!(SubsystemId::SimulationLayer.label(), "simulation-layer");
        assert_eq!(SubsystemId::EventProcessing.label(), "event-processing");
        assert_eq!(SubsystemId::RuntimeOverhead.label(), "runtime-overhead");
        assert_eq!(format!("{}", SubsystemId::EventProcessing), "event-processing");
    }

    #[test]
    fn overshoot_ignores_underruns() {
        let mut budget = FrameBudget::fresh(0, 16.7);
        budget.granted_ms[SubsystemId::SimulationLayer as usize] = 6.0;
        budget.actual_ms[SubsystemId::SimulationLayer as usize] = 4.0;
        budget.granted_ms[SubsystemId::InteractiveLayer as usize] = 4.0;
        budget.actual_ms[SubsystemId::InteractiveLayer as usize] = 5.5;
        assert!((budget.overshoot_total_ms() - 1.5).abs() < 0.001);
    }

    #[test]
    fn default_split_fills_the_frame() {
        let config = BudgetConfig::default();
        let split_total: f64 = config.split_ms.iter().sum();
        assert!((split_total - config.total_ms).abs() < 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_total() {
        let config = BudgetConfig {
            total_ms: 0.0,
            ..BudgetConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveBudget { .. })
        ));

        let config = BudgetConfig {
            total_ms: -16.7,
            ..BudgetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversubscribed_split() {
        let config = BudgetConfig {
            total_ms: 10.0,
            split_ms: [4.0, 4.0, 2.0, 2.0],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SplitExceedsTotal { .. })
        ));
    }

    #[test]
    fn validate_rejects_negative_slice() {
        let config = BudgetConfig {
            total_ms: 16.7,
            split_ms: [6.0, -1.0, 2.7, 2.0],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeSlice {
                subsystem: "simulation-layer",
                ..
            })
        ));
    }
}
