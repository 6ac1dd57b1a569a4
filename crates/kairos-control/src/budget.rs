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

//! Frame budget arbitration.
//!
//! One [`FrameBudgetManager`] owns the budget ledger for the running frame.
//! Subsystems reserve time with [`allocate`](FrameBudgetManager::allocate)
//! before doing work, and reconcile what they actually spent with
//! [`report_usage`](FrameBudgetManager::report_usage) afterwards. A refused
//! reservation is an ordinary `false`, never a panic: the caller is expected
//! to defer or shrink its work.

use std::fmt;

use kairos_core::budget::{BudgetConfig, FrameBudget, SubsystemId, BUDGET_EPSILON_MS};
use kairos_core::config::ConfigError;
use log::{debug, trace, warn};

/// Handle to a registered budget-exceeded observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Monotonic counters kept across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetStats {
    /// Frames begun, including the initial one.
    pub frames_started: u64,
    /// Reservations granted.
    pub grants: u64,
    /// Reservations refused, including malformed requests.
    pub rejections: u64,
    /// Usage reports refused as malformed.
    pub invalid_reports: u64,
    /// Frames that ended up over budget after reconciliation.
    pub overrun_frames: u64,
}

type OverrunObserver = Box<dyn FnMut(&FrameBudget)>;

/// Owns and arbitrates the per-frame time budget.
///
/// Reservations can never push the ledger negative; only reconciled usage
/// beyond a grant can. While no overrun has occurred, the sum of all grants
/// plus the remaining budget equals the frame total (up to float tolerance).
///
/// The manager lives on the coordination thread; observers are plain `FnMut`
/// closures and are invoked inline.
pub struct FrameBudgetManager {
    config: BudgetConfig,
    budget: FrameBudget,
    observers: Vec<(ObserverId, OverrunObserver)>,
    next_observer: u64,
    stats: BudgetStats,
}

impl FrameBudgetManager {
    /// Creates a manager with a validated budget profile. Frame 0 is open
    /// for reservations immediately.
    pub fn new(config: BudgetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let budget = FrameBudget::fresh(0, config.total_ms);
        Ok(Self {
            config,
            budget,
            observers: Vec::new(),
            next_observer: 0,
            stats: BudgetStats {
                frames_started: 1,
                ..BudgetStats::default()
            },
        })
    }

    /// Closes the current frame and opens a fresh ledger.
    ///
    /// Called exactly once per frame boundary, before any reservation for
    /// the new frame.
    pub fn reset_frame(&mut self) {
        trace!(
            "frame {} closed: granted {:.2} ms, remaining {:.2} ms, overrun {}",
            self.budget.frame_id,
            self.budget.granted_total_ms(),
            self.budget.remaining_ms,
            self.budget.overrun
        );
        self.budget = FrameBudget::fresh(self.budget.frame_id + 1, self.config.total_ms);
        self.stats.frames_started += 1;
    }

    /// Reserves `time_ms` for a subsystem this frame.
    ///
    /// Returns `false` without touching the ledger when the request does not
    /// fit or is malformed (negative, NaN or infinite).
    pub fn allocate(&mut self, subsystem: SubsystemId, time_ms: f64) -> bool {
        if !time_ms.is_finite() || time_ms < 0.0 {
            warn!("rejecting malformed reservation from {subsystem}: {time_ms} ms");
            self.stats.rejections += 1;
            return false;
        }
        if time_ms > self.budget.remaining_ms + BUDGET_EPSILON_MS {
            debug!(
                "budget rejection: {subsystem} asked {:.2} ms with {:.2} ms remaining in frame {}",
                time_ms, self.budget.remaining_ms, self.budget.frame_id
            );
            self.stats.rejections += 1;
            return false;
        }
        self.budget.granted_ms[subsystem as usize] += time_ms;
        // An exact-fit grant may land a hair below zero from float error;
        // reservations never leave the ledger negative.
        let next = self.budget.remaining_ms - time_ms;
        self.budget.remaining_ms = if next < 0.0 { 0.0 } else { next };
        self.stats.grants += 1;
        trace!(
            "granted {time_ms:.2} ms to {subsystem}, {:.2} ms remaining",
            self.budget.remaining_ms
        );
        true
    }

    /// Reconciles the time a subsystem actually spent this frame.
    ///
    /// The last report per subsystem wins. Spending beyond the grant shrinks
    /// the remaining budget and may push it negative; when that happens the
    /// overrun flag is set and every registered observer is invoked with the
    /// updated ledger. Finishing under the grant does not refund time: the
    /// reservation was already planned around.
    pub fn report_usage(&mut self, subsystem: SubsystemId, actual_ms: f64) {
        if !actual_ms.is_finite() || actual_ms < 0.0 {
            warn!("ignoring malformed usage report from {subsystem}: {actual_ms} ms");
            self.stats.invalid_reports += 1;
            return;
        }
        let overshoot_before = self.budget.overshoot_total_ms();
        self.budget.actual_ms[subsystem as usize] = actual_ms;
        let overshoot_after = self.budget.overshoot_total_ms();
        self.budget.remaining_ms =
            self.budget.total_ms - self.budget.granted_total_ms() - overshoot_after;

        let grew = overshoot_after > overshoot_before + BUDGET_EPSILON_MS;
        if grew && self.budget.remaining_ms < 0.0 {
            if !self.budget.overrun {
                self.budget.overrun = true;
                self.stats.overrun_frames += 1;
            }
            warn!(
                "frame {} over budget: {subsystem} used {actual_ms:.2} ms of a {:.2} ms grant, {:.2} ms remaining",
                self.budget.frame_id,
                self.budget.granted_for(subsystem),
                self.budget.remaining_ms
            );
            // Observers see the ledger with the flag already set.
            let snapshot = self.budget;
            for (_, observer) in &mut self.observers {
                observer(&snapshot);
            }
        }
    }

    /// Unreserved time left this frame, in milliseconds.
    pub fn remaining_budget(&self) -> f64 {
        self.budget.remaining_ms
    }

    /// A copy of the current ledger.
    pub fn current_budget(&self) -> FrameBudget {
        self.budget
    }

    /// The budget profile this manager arbitrates.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Counters kept across frames.
    pub fn stats(&self) -> BudgetStats {
        self.stats
    }

    /// Registers an observer invoked whenever reconciliation pushes the
    /// frame over budget.
    pub fn on_budget_exceeded(&mut self, observer: impl FnMut(&FrameBudget) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Removes an observer. Returns whether it was registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(o, _)| *o != id);
        self.observers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn manager() -> FrameBudgetManager {
        FrameBudgetManager::new(BudgetConfig::default()).unwrap()
    }

    #[test]
    fn sixty_hertz_allocation_walkthrough() {
        let mut manager = manager();

        assert!(manager.allocate(SubsystemId::InteractiveLayer, 4.0));
        assert!((manager.remaining_budget() - 12.7).abs() < 0.001);

        assert!(manager.allocate(SubsystemId::SimulationLayer, 8.0));
        assert!((manager.remaining_budget() - 4.7).abs() < 0.001);

        assert!(manager.allocate(SubsystemId::EventProcessing, 2.0));
        assert!((manager.remaining_budget() - 2.7).abs() < 0.001);

        // 5 ms does not fit in the 2.7 ms that are left.
        assert!(!manager.allocate(SubsystemId::RuntimeOverhead, 5.0));
        assert!((manager.remaining_budget() - 2.7).abs() < 0.001);

        let budget = manager.current_budget();
        assert!(
            (budget.granted_total_ms() + budget.remaining_ms - budget.total_ms).abs() < 0.001
        );
        assert!(!budget.overrun);
        assert_eq!(manager.current_budget(), budget);
    }

    #[test]
    fn rejection_leaves_ledger_untouched() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 10.0));
        let before = manager.current_budget();

        assert!(!manager.allocate(SubsystemId::InteractiveLayer, 7.0));

        assert_eq!(manager.current_budget(), before);
        assert_eq!(manager.stats().rejections, 1);
        assert_eq!(manager.stats().grants, 1);
    }

    #[test]
    fn exact_fit_allocation_succeeds() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 10.0));
        let rest = manager.remaining_budget();
        assert!(manager.allocate(SubsystemId::InteractiveLayer, rest));
        assert!(manager.remaining_budget().abs() < 0.001);
        assert!(manager.remaining_budget() >= 0.0);
    }

    #[test]
    fn malformed_requests_are_refused() {
        let mut manager = manager();
        assert!(!manager.allocate(SubsystemId::InteractiveLayer, -1.0));
        assert!(!manager.allocate(SubsystemId::InteractiveLayer, f64::NAN));
        assert!(!manager.allocate(SubsystemId::InteractiveLayer, f64::INFINITY));
        assert_eq!(manager.stats().rejections, 3);
        assert!((manager.remaining_budget() - 16.7).abs() < 0.001);
    }

    #[test]
    fn reset_opens_a_fresh_ledger() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 8.0));
        manager.report_usage(SubsystemId::SimulationLayer, 20.0);
        assert!(manager.current_budget().overrun);

        manager.reset_frame();

        let budget = manager.current_budget();
        assert_eq!(budget.frame_id, 1);
        assert!((budget.remaining_ms - 16.7).abs() < 0.001);
        assert!(!budget.overrun);
        assert_eq!(budget.granted_total_ms(), 0.0);
        assert_eq!(manager.stats().frames_started, 2);
    }

    #[test]
    fn overshoot_fires_observers_with_final_ledger() {
        let mut manager = manager();
        let seen: Rc<RefCell<Vec<(bool, f64)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        manager.on_budget_exceeded(move |budget| {
            sink.borrow_mut().push((budget.overrun, budget.remaining_ms));
        });

        assert!(manager.allocate(SubsystemId::SimulationLayer, 14.0));
        // 14 granted, 20 used: 6 ms overshoot against 2.7 ms headroom.
        manager.report_usage(SubsystemId::SimulationLayer, 20.0);

        let calls = seen.borrow();
        assert_eq!(calls.len(), 1);
        let (overrun, remaining) = calls[0];
        assert!(overrun);
        assert!(remaining < 0.0);
        assert_eq!(manager.stats().overrun_frames, 1);
    }

    #[test]
    fn overshoot_within_headroom_stays_quiet() {
        let mut manager = manager();
        let fired = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&fired);
        manager.on_budget_exceeded(move |_| *sink.borrow_mut() += 1);

        assert!(manager.allocate(SubsystemId::SimulationLayer, 4.0));
        // 2 ms overshoot, easily absorbed by the 12.7 ms still unreserved.
        manager.report_usage(SubsystemId::SimulationLayer, 6.0);

        assert_eq!(*fired.borrow(), 0);
        assert!(!manager.current_budget().overrun);
        assert!(manager.remaining_budget() > 0.0);
    }

    #[test]
    fn underrun_does_not_refund_time() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 8.0));
        let before = manager.remaining_budget();
        manager.report_usage(SubsystemId::SimulationLayer, 3.0);
        assert!((manager.remaining_budget() - before).abs() < 0.001);
    }

    #[test]
    fn last_usage_report_wins() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 8.0));
        manager.report_usage(SubsystemId::SimulationLayer, 30.0);
        assert!(manager.current_budget().overrun);
        let deep = manager.remaining_budget();

        // A corrected report shrinks the overshoot; the frame stays marked.
        manager.report_usage(SubsystemId::SimulationLayer, 9.0);
        assert!(manager.remaining_budget() > deep);
        assert!(manager.current_budget().overrun);
    }

    #[test]
    fn removed_observer_is_not_called() {
        let mut manager = manager();
        let fired = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&fired);
        let id = manager.on_budget_exceeded(move |_| *sink.borrow_mut() += 1);

        assert!(manager.remove_observer(id));
        assert!(!manager.remove_observer(id));

        assert!(manager.allocate(SubsystemId::SimulationLayer, 14.0));
        manager.report_usage(SubsystemId::SimulationLayer, 25.0);
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn malformed_usage_reports_are_counted() {
        let mut manager = manager();
        assert!(manager.allocate(SubsystemId::SimulationLayer, 8.0));
        manager.report_usage(SubsystemId::SimulationLayer, f64::NAN);
        manager.report_usage(SubsystemId::SimulationLayer, -2.0);
        assert_eq!(manager.stats().invalid_reports, 2);
        assert_eq!(manager.current_budget().actual_for(SubsystemId::SimulationLayer), 0.0);
    }

    #[test]
    fn invalid_config_is_refused_at_construction() {
        let config = BudgetConfig {
            total_ms: -5.0,
            ..BudgetConfig::default()
        };
        assert!(FrameBudgetManager::new(config).is_err());
    }
}
