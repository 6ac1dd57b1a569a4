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

//! The performance governor: walks the degradation ladder one step at a
//! time based on frame health observations.
//!
//! Escalation is eager: a single observation breaching the current state's
//! limits moves one step up. Recovery is deliberately sluggish to avoid
//! oscillation: the metrics must hold below the target state's limits with
//! hysteresis headroom for several consecutive checks, and the current state
//! must have been held for a minimum dwell.

use std::time::{Duration, Instant};

use kairos_core::config::ConfigError;
use kairos_core::pressure::{
    DegradeEvent, PerformanceSnapshot, PerformanceThresholds, PressureState, RecoveryPolicy,
};
use log::{debug, info, warn};

/// Owns the pressure state and decides transitions.
///
/// Drive it with one [`evaluate`](PerformanceGovernor::evaluate) call per
/// frame; the recovery streak counts evaluations, so calling it more often
/// shortens the effective recovery window.
pub struct PerformanceGovernor {
    thresholds: PerformanceThresholds,
    recovery: RecoveryPolicy,
    state: PressureState,
    entered_state_at: Instant,
    healthy_streak: u32,
    escalations: u64,
    recoveries: u64,
}

impl PerformanceGovernor {
    /// Creates a governor in [`PressureState::Normal`] with validated
    /// profiles.
    pub fn new(
        thresholds: PerformanceThresholds,
        recovery: RecoveryPolicy,
    ) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        recovery.validate()?;
        Ok(Self {
            thresholds,
            recovery,
            state: PressureState::Normal,
            entered_state_at: Instant::now(),
            healthy_streak: 0,
            escalations: 0,
            recoveries: 0,
        })
    }

    /// Judges one observation and returns the transition it caused, if any.
    ///
    /// Moves at most one ladder step per call, in either direction. The
    /// current state's own limits decide escalation; the target state's
    /// limits (with hysteresis) decide recovery.
    pub fn evaluate(&mut self, snapshot: &PerformanceSnapshot) -> Option<DegradeEvent> {
        let now = Instant::now();

        if let Some(trigger) = self.thresholds.tier(self.state).breached_by(snapshot) {
            self.healthy_streak = 0;
            return match self.state.escalated() {
                Some(next) => {
                    warn!(
                        "pressure {} -> {next} ({trigger}): frame {:.1} ms, latency {:.1} ms, \
                         memory {:.0} MiB, collections {:.1} Hz, {} queued",
                        self.state,
                        snapshot.frame_time_ms,
                        snapshot.event_latency_ms,
                        snapshot.memory_mb,
                        snapshot.collection_hz,
                        snapshot.queue_length
                    );
                    let event = DegradeEvent {
                        from: self.state,
                        to: next,
                        trigger: Some(trigger),
                        occurred_at: now,
                        snapshot: *snapshot,
                    };
                    self.state = next;
                    self.entered_state_at = now;
                    self.escalations += 1;
                    Some(event)
                }
                None => {
                    debug!("{trigger} persists at the top of the ladder");
                    None
                }
            };
        }

        let target = match self.state.recovered() {
            Some(target) => target,
            None => return None,
        };
        if self
            .thresholds
            .tier(target)
            .holds_with_margin(snapshot, self.recovery.hysteresis_pct)
        {
            self.healthy_streak += 1;
        } else {
            self.healthy_streak = 0;
            return None;
        }

        let dwelled = now.saturating_duration_since(self.entered_state_at)
            >= self.recovery.min_dwell();
        if self.healthy_streak >= self.recovery.consecutive_healthy_required && dwelled {
            info!(
                "pressure recovered {} -> {target} after {} healthy checks",
                self.state, self.healthy_streak
            );
            let event = DegradeEvent {
                from: self.state,
                to: target,
                trigger: None,
                occurred_at: now,
                snapshot: *snapshot,
            };
            self.state = target;
            self.entered_state_at = now;
            self.healthy_streak = 0;
            self.recoveries += 1;
            Some(event)
        } else {
            None
        }
    }

    /// Current ladder position.
    pub fn state(&self) -> PressureState {
        self.state
    }

    /// Time since the current state was entered.
    pub fn time_in_state(&self) -> Duration {
        self.entered_state_at.elapsed()
    }

    /// Healthy evaluations in a row so far.
    pub fn healthy_streak(&self) -> u32 {
        self.healthy_streak
    }

    /// Ladder steps taken upward since construction.
    pub fn escalation_count(&self) -> u64 {
        self.escalations
    }

    /// Ladder steps taken downward since construction.
    pub fn recovery_count(&self) -> u64 {
        self.recoveries
    }
}
