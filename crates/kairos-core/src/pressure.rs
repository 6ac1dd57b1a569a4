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

//! Performance pressure vocabulary: the degradation ladder, the triggers
//! that climb it, threshold profiles and the notification payload.
//!
//! The evaluation policy (one step per check, hysteresis, dwell) lives in
//! `kairos-control`; this module defines the data it operates on.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// The degradation ladder, least to most severe.
///
/// Variant order is severity order, so the derived `Ord` can be used to
/// compare states directly (`Normal` sorts first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PressureState {
    /// Full quality, nothing shed.
    Normal,
    /// Non-essential work deferred.
    Degraded,
    /// Quality reduced to protect the frame rate.
    Critical,
    /// Survival mode, essential work only.
    Emergency,
}

impl PressureState {
    /// Numeric severity, 0 for [`Normal`](PressureState::Normal) up to 3.
    pub fn severity(&self) -> u8 {
        *self as u8
    }

    /// The next state up the ladder, or `None` at the top.
    pub fn escalated(&self) -> Option<PressureState> {
        match self {
            PressureState::Normal => Some(PressureState::Degraded),
            PressureState::Degraded => Some(PressureState::Critical),
            PressureState::Critical => Some(PressureState::Emergency),
            PressureState::Emergency => None,
        }
    }

    /// The next state down the ladder, or `None` at the bottom.
    pub fn recovered(&self) -> Option<PressureState> {
        match self {
            PressureState::Normal => None,
            PressureState::Degraded => Some(PressureState::Normal),
            PressureState::Critical => Some(PressureState::Degraded),
            PressureState::Emergency => Some(PressureState::Critical),
        }
    }
}

impl fmt::Display for PressureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PressureState::Normal => "normal",
            PressureState::Degraded => "degraded",
            PressureState::Critical => "critical",
            PressureState::Emergency => "emergency",
        };
        write!(f, "{label}")
    }
}

/// Which metric pushed the ladder up a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradeTrigger {
    /// Frame time exceeded the tier limit.
    FrameOverrun,
    /// Event delivery latency exceeded the tier limit.
    EventLatency,
    /// Memory footprint exceeded the tier limit.
    MemoryPressure,
    /// Collection cycles ran more often than the tier allows.
    CollectionPressure,
}

impl fmt::Display for DegradeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DegradeTrigger::FrameOverrun => "frame-overrun",
            DegradeTrigger::EventLatency => "event-latency",
            DegradeTrigger::MemoryPressure => "memory-pressure",
            DegradeTrigger::CollectionPressure => "collection-pressure",
        };
        write!(f, "{label}")
    }
}

/// One observation of the runtime's health, fed to the governor each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSnapshot {
    /// Wall time of the frame that just ended, in milliseconds.
    pub frame_time_ms: f64,
    /// Rolling average queue-to-delivery latency on the bus, in milliseconds.
    pub event_latency_ms: f64,
    /// Memory footprint in mebibytes, from the last telemetry sample.
    pub memory_mb: f64,
    /// Collection cycles per second over the last sliding window.
    pub collection_hz: f64,
    /// Events queued on the bus at capture time, all tiers.
    pub queue_length: usize,
    /// When the observation was taken.
    pub captured_at: Instant,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            frame_time_ms: 0.0,
            event_latency_ms: 0.0,
            memory_mb: 0.0,
            collection_hz: 0.0,
            queue_length: 0,
            captured_at: Instant::now(),
        }
    }
}

/// The limits one pressure state tolerates before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTier {
    /// Highest acceptable frame time, in milliseconds.
    pub max_frame_time_ms: f64,
    /// Highest acceptable event delivery latency, in milliseconds.
    pub max_event_latency_ms: f64,
    /// Highest acceptable memory footprint, in mebibytes.
    pub max_memory_mb: f64,
    /// Highest acceptable collection rate, in cycles per second.
    /// `None` disables the collection trigger for this tier.
    pub max_collection_hz: Option<f64>,
}

impl ThresholdTier {
    /// Classifies a snapshot against this tier.
    ///
    /// Any single limit being exceeded is sufficient. When several are
    /// exceeded at once, the most direct frame-health signal wins: frame
    /// time, then event latency, then memory, then collection rate.
    pub fn breached_by(&self, snapshot: &PerformanceSnapshot) -> Option<DegradeTrigger> {
        if snapshot.frame_time_ms > self.max_frame_time_ms {
            return Some(DegradeTrigger::FrameOverrun);
        }
        if snapshot.event_latency_ms > self.max_event_latency_ms {
            return Some(DegradeTrigger::EventLatency);
        }
        if snapshot.memory_mb > self.max_memory_mb {
            return Some(DegradeTrigger::MemoryPressure);
        }
        if let Some(max_hz) = self.max_collection_hz {
            if snapshot.collection_hz > max_hz {
                return Some(DegradeTrigger::CollectionPressure);
            }
        }
        None
    }

    /// Returns whether every metric sits below this tier's limits with the
    /// given relative margin (`0.10` requires 10% headroom). Used for
    /// recovery checks, where touching the limit is not good enough.
    pub fn holds_with_margin(&self, snapshot: &PerformanceSnapshot, margin_pct: f64) -> bool {
        let scale = 1.0 - margin_pct;
        if snapshot.frame_time_ms >= self.max_frame_time_ms * scale {
            return false;
        }
        if snapshot.event_latency_ms >= self.max_event_latency_ms * scale {
            return false;
        }
        if snapshot.memory_mb >= self.max_memory_mb * scale {
            return false;
        }
        if let Some(max_hz) = self.max_collection_hz {
            if snapshot.collection_hz >= max_hz * scale {
                return false;
            }
        }
        true
    }
}

/// Threshold profile for the whole ladder.
///
/// Escalation out of a state is judged against that state's own tier, so the
/// limits must not shrink as severity grows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    /// Limits tolerated while [`PressureState::Normal`].
    pub normal: ThresholdTier,
    /// Limits tolerated while [`PressureState::Degraded`].
    pub degraded: ThresholdTier,
    /// Limits tolerated while [`PressureState::Critical`].
    pub critical: ThresholdTier,
    /// Limits tolerated while [`PressureState::Emergency`].
    pub emergency: ThresholdTier,
}

impl PerformanceThresholds {
    /// The tier a given state is judged against.
    pub fn tier(&self, state: PressureState) -> &ThresholdTier {
        match state {
            PressureState::Normal => &self.normal,
            PressureState::Degraded => &self.degraded,
            PressureState::Critical => &self.critical,
            PressureState::Emergency => &self.emergency,
        }
    }

    /// Checks limits are positive and non-decreasing up the ladder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ladder = [
            ("normal", &self.normal),
            ("degraded", &self.degraded),
            ("critical", &self.critical),
            ("emergency", &self.emergency),
        ];
        for (name, tier) in &ladder {
            for (field, value) in [
                ("max_frame_time_ms", tier.max_frame_time_ms),
                ("max_event_latency_ms", tier.max_event_latency_ms),
                ("max_memory_mb", tier.max_memory_mb),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(ConfigError::NonPositiveThreshold { tier: name, field });
                }
            }
            if let Some(hz) = tier.max_collection_hz {
                if !hz.is_finite() || hz <= 0.0 {
                    return Err(ConfigError::NonPositiveThreshold {
                        tier: name,
                        field: "max_collection_hz",
                    });
                }
            }
        }
        for window in ladder.windows(2) {
            let (lower_name, lower) = window[0];
            let (upper_name, upper) = window[1];
            let ordered = lower.max_frame_time_ms <= upper.max_frame_time_ms
                && lower.max_event_latency_ms <= upper.max_event_latency_ms
                && lower.max_memory_mb <= upper.max_memory_mb
                && match (lower.max_collection_hz, upper.max_collection_hz) {
                    (Some(a), Some(b)) => a <= b,
                    _ => true,
                };
            if !ordered {
                return Err(ConfigError::ThresholdOrder {
                    lower: lower_name,
                    upper: upper_name,
                });
            }
        }
        Ok(())
    }
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            // 18 ms is one dropped 60 Hz frame with margin; 33.4 ms is two
            // full frames missed.
            normal: ThresholdTier {
                max_frame_time_ms: 18.0,
                max_event_latency_ms: 10.0,
                max_memory_mb: 512.0,
                max_collection_hz: Some(2.0),
            },
            degraded: ThresholdTier {
                max_frame_time_ms: 25.0,
                max_event_latency_ms: 20.0,
                max_memory_mb: 768.0,
                max_collection_hz: Some(4.0),
            },
            critical: ThresholdTier {
                max_frame_time_ms: 33.4,
                max_event_latency_ms: 40.0,
                max_memory_mb: 1024.0,
                max_collection_hz: Some(8.0),
            },
            emergency: ThresholdTier {
                max_frame_time_ms: 50.0,
                max_event_latency_ms: 80.0,
                max_memory_mb: 1536.0,
                max_collection_hz: Some(16.0),
            },
        }
    }
}

/// Tunables for stepping back down the ladder.
///
/// Recovery is deliberately slower than escalation: metrics must hold below
/// the target tier's limits with a margin, for several checks in a row,
/// after a minimum stay in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Relative headroom required below the target tier's limits.
    pub hysteresis_pct: f64,
    /// Consecutive healthy evaluations required before stepping down.
    pub consecutive_healthy_required: u32,
    /// Minimum time in the current state before stepping down.
    pub min_dwell_ms: u64,
}

impl RecoveryPolicy {
    /// Minimum dwell as a [`Duration`].
    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }

    /// Checks the tunables are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hysteresis_pct.is_finite()
            || self.hysteresis_pct < 0.0
            || self.hysteresis_pct >= 1.0
        {
            return Err(ConfigError::InvalidHysteresis {
                value: self.hysteresis_pct,
            });
        }
        if self.consecutive_healthy_required == 0 {
            return Err(ConfigError::ZeroHealthyStreak);
        }
        Ok(())
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            hysteresis_pct: 0.10,
            consecutive_healthy_required: 3,
            min_dwell_ms: 1000,
        }
    }
}

/// Emitted on every ladder transition, up or down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradeEvent {
    /// State before the transition.
    pub from: PressureState,
    /// State after the transition.
    pub to: PressureState,
    /// The metric that forced an escalation; `None` for recoveries.
    pub trigger: Option<DegradeTrigger>,
    /// When the transition happened.
    pub occurred_at: Instant,
    /// The observation that drove the decision.
    pub snapshot: PerformanceSnapshot,
}

impl DegradeEvent {
    /// Returns whether this transition moved up the ladder.
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}
