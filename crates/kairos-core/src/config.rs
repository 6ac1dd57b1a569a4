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

//! Configuration profiles for the coordination layer.
//!
//! Profiles are plain serde structs with container-level defaults, so a JSON
//! profile only needs to name the fields it overrides. Every profile is
//! checked by `validate` before a component will accept it; a bad profile is
//! a [`ConfigError`], never a panic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetConfig;
use crate::event::EventPriority;
use crate::pressure::{PerformanceThresholds, RecoveryPolicy};

/// Batching and queue-bound tunables for the prioritized bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Queue depth at which the high tier forces a synchronous flush.
    pub batch_size: usize,
    /// Most events drained from one tier in one flush, and the queue bound
    /// for the high and normal tiers.
    pub max_batch_size: usize,
    /// Cadence of scheduled flush points, in milliseconds.
    pub flush_interval_ms: u64,
    /// Queue bound for the low tier. Beyond it the oldest low event is shed
    /// instead of refusing the new one.
    pub low_queue_ceiling: usize,
    /// Longest an immediate event may wait. Zero: dispatched at publish.
    pub immediate_max_wait_ms: u64,
    /// Longest a queued high event may wait before a publish forces a flush.
    pub high_max_wait_ms: u64,
    /// Longest a queued normal event may wait before a publish forces a flush.
    pub normal_max_wait_ms: u64,
    /// Longest a queued low event may wait. Advisory; low events drain at
    /// scheduled flush points only.
    pub low_max_wait_ms: u64,
}

impl BatchConfig {
    /// The configured wait ceiling for a tier.
    pub fn max_wait(&self, priority: EventPriority) -> Duration {
        let ms = match priority {
            EventPriority::Immediate => self.immediate_max_wait_ms,
            EventPriority::High => self.high_max_wait_ms,
            EventPriority::Normal => self.normal_max_wait_ms,
            EventPriority::Low => self.low_max_wait_ms,
        };
        Duration::from_millis(ms)
    }

    /// Scheduled flush cadence as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Checks the tunables are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.max_batch_size < self.batch_size {
            return Err(ConfigError::BatchBounds {
                batch_size: self.batch_size,
                max_batch_size: self.max_batch_size,
            });
        }
        if self.low_queue_ceiling < self.max_batch_size {
            return Err(ConfigError::CeilingBelowBatch {
                ceiling: self.low_queue_ceiling,
                max_batch_size: self.max_batch_size,
            });
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_batch_size: 50,
            flush_interval_ms: 16,
            low_queue_ceiling: 256,
            immediate_max_wait_ms: 0,
            high_max_wait_ms: 8,
            normal_max_wait_ms: 16,
            low_max_wait_ms: 250,
        }
    }
}

/// Circuit breaker tunables for the prioritized bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive delivery failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a half-open trial.
    pub cooldown_ms: u64,
}

impl BreakerConfig {
    /// Cool-down as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Checks the tunables are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 500,
        }
    }
}

/// The full profile for a frame coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Frame budget sizing.
    pub budget: BudgetConfig,
    /// Bus batching and queue bounds.
    pub batch: BatchConfig,
    /// Bus circuit breaker.
    pub breaker: BreakerConfig,
    /// Degradation ladder limits.
    pub thresholds: PerformanceThresholds,
    /// Recovery hysteresis and dwell.
    pub recovery: RecoveryPolicy,
    /// Capacity of the bounded channel external telemetry producers feed.
    pub signal_buffer_size: usize,
}

impl CoordinatorConfig {
    /// Default capacity of the external signal channel.
    pub const DEFAULT_SIGNAL_BUFFER: usize = 1024;

    /// Parses a JSON profile and validates it. Fields absent from the
    /// profile keep their defaults.
    pub fn from_json_str(profile: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig =
            serde_json::from_str(profile).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section of the profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate()?;
        self.batch.validate()?;
        self.breaker.validate()?;
        self.thresholds.validate()?;
        self.recovery.validate()?;
        if self.signal_buffer_size == 0 {
            return Err(ConfigError::ZeroSignalBuffer);
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            batch: BatchConfig::default(),
            breaker: BreakerConfig::default(),
            thresholds: PerformanceThresholds::default(),
            recovery: RecoveryPolicy::default(),
            signal_buffer_size: Self::DEFAULT_SIGNAL_BUFFER,
        }
    }
}

/// Why a configuration profile was refused.
#[derive(Debug)]
pub enum ConfigError {
    /// The total frame budget is zero, negative or not finite.
    NonPositiveBudget {
        /// Offending total.
        total_ms: f64,
    },
    /// An advisory budget slice is negative or not finite.
    NegativeSlice {
        /// Subsystem label of the offending slice.
        subsystem: &'static str,
        /// Offending value.
        value_ms: f64,
    },
    /// The advisory slices reserve more than the whole frame.
    SplitExceedsTotal {
        /// Sum of the slices.
        split_ms: f64,
        /// Configured frame total.
        total_ms: f64,
    },
    /// `batch_size` is zero.
    ZeroBatch,
    /// `max_batch_size` is below `batch_size`.
    BatchBounds {
        /// Configured soft cap.
        batch_size: usize,
        /// Configured hard cap.
        max_batch_size: usize,
    },
    /// The low tier ceiling is below `max_batch_size`.
    CeilingBelowBatch {
        /// Configured low tier ceiling.
        ceiling: usize,
        /// Configured hard cap.
        max_batch_size: usize,
    },
    /// The breaker would trip on zero failures.
    ZeroFailureThreshold,
    /// A threshold limit is zero, negative or not finite.
    NonPositiveThreshold {
        /// Ladder tier name.
        tier: &'static str,
        /// Field name within the tier.
        field: &'static str,
    },
    /// A higher ladder tier has tighter limits than a lower one.
    ThresholdOrder {
        /// The lower tier in the offending pair.
        lower: &'static str,
        /// The upper tier in the offending pair.
        upper: &'static str,
    },
    /// `hysteresis_pct` is outside `[0, 1)`.
    InvalidHysteresis {
        /// Offending value.
        value: f64,
    },
    /// `consecutive_healthy_required` is zero.
    ZeroHealthyStreak,
    /// `signal_buffer_size` is zero.
    ZeroSignalBuffer,
    /// The profile is not valid JSON for this schema.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveBudget { total_ms } => {
                write!(f, "total frame budget must be positive, got {total_ms} ms")
            }
            ConfigError::NegativeSlice {
                subsystem,
                value_ms,
            } => {
                write!(
                    f,
                    "budget slice for {subsystem} must be non-negative, got {value_ms} ms"
                )
            }
            ConfigError::SplitExceedsTotal { split_ms, total_ms } => {
                write!(
                    f,
                    "budget split sums to {split_ms} ms, more than the {total_ms} ms total"
                )
            }
            ConfigError::ZeroBatch => write!(f, "batch_size must be at least 1"),
            ConfigError::BatchBounds {
                batch_size,
                max_batch_size,
            } => {
                write!(
                    f,
                    "max_batch_size ({max_batch_size}) must not be below batch_size ({batch_size})"
                )
            }
            ConfigError::CeilingBelowBatch {
                ceiling,
                max_batch_size,
            } => {
                write!(
                    f,
                    "low_queue_ceiling ({ceiling}) must not be below max_batch_size ({max_batch_size})"
                )
            }
            ConfigError::ZeroFailureThreshold => {
                write!(f, "breaker failure_threshold must be at least 1")
            }
            ConfigError::NonPositiveThreshold { tier, field } => {
                write!(f, "{tier} threshold {field} must be positive")
            }
            ConfigError::ThresholdOrder { lower, upper } => {
                write!(
                    f,
                    "{upper} tier limits must not be tighter than {lower} tier limits"
                )
            }
            ConfigError::InvalidHysteresis { value } => {
                write!(f, "hysteresis_pct must be in [0, 1), got {value}")
            }
            ConfigError::ZeroHealthyStreak => {
                write!(f, "consecutive_healthy_required must be at least 1")
            }
            ConfigError::ZeroSignalBuffer => {
                write!(f, "signal_buffer_size must be at least 1")
            }
            ConfigError::Parse(e) => write!(f, "failed to parse configuration profile: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_config_is_consistent() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_wait(EventPriority::Immediate), Duration::ZERO);
        assert!(config.max_wait(EventPriority::High) < config.max_wait(EventPriority::Normal));
        assert!(config.max_wait(EventPriority::Normal) < config.max_wait(EventPriority::Low));
    }

    #[test]
    fn batch_bounds_are_checked() {
        let config = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatch)));

        let config = BatchConfig {
            batch_size: 32,
            max_batch_size: 16,
            ..BatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BatchBounds { .. })
        ));

        let config = BatchConfig {
            low_queue_ceiling: 10,
            ..BatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CeilingBelowBatch { .. })
        ));
    }

    #[test]
    fn breaker_needs_a_positive_threshold() {
        assert!(BreakerConfig::default().validate().is_ok());
        let config = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroFailureThreshold)
        ));
    }

    #[test]
    fn coordinator_default_validates() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn json_profile_overrides_only_named_fields() {
        let profile = r#"{
            "budget": { "total_ms": 33.4, "split_ms": [12.0, 12.0, 5.4, 4.0] },
            "breaker": { "failure_threshold": 3 }
        }"#;
        let config = CoordinatorConfig::from_json_str(profile).unwrap();
        assert!((config.budget.total_ms - 33.4).abs() < 0.001);
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.batch.max_batch_size, 50);
        assert_eq!(config.breaker.cooldown_ms, 500);
    }

    #[test]
    fn json_profile_rejects_malformed_input() {
        let err = CoordinatorConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        // The parse failure is preserved as the error source.
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn json_profile_rejects_invalid_values() {
        let profile = r#"{ "budget": { "total_ms": -1.0 } }"#;
        assert!(matches!(
            CoordinatorConfig::from_json_str(profile),
            Err(ConfigError::NonPositiveBudget { .. })
        ));
    }
}
