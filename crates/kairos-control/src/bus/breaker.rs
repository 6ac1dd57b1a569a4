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

//! Circuit breaker guarding the event bus against failing subscribers.
//!
//! Consecutive delivery failures trip the breaker open; while open, the bus
//! neither accepts nor forwards events. After the cool-down the breaker goes
//! half-open and the next dispatched event serves as the trial: success
//! closes the breaker, failure re-opens it and restarts the cool-down.

use std::fmt;
use std::time::{Duration, Instant};

use kairos_core::config::BreakerConfig;
use log::{info, warn};

/// Externally visible breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Healthy; deliveries flow.
    Closed,
    /// Cool-down elapsed; the next delivery is the trial.
    HalfOpen,
    /// Tripped; publishes are refused and flushes deferred.
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half-open",
            BreakerState::Open => "open",
        };
        write!(f, "{label}")
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trips: 0,
        }
    }

    /// Advances `Open` to `HalfOpen` once the cool-down has elapsed.
    pub fn poll(&mut self, now: Instant) {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if now.saturating_duration_since(opened_at) >= self.config.cooldown() {
                    self.state = BreakerState::HalfOpen;
                    info!(
                        "circuit breaker half-open after {} ms cool-down",
                        self.config.cooldown_ms
                    );
                }
            }
        }
    }

    /// Whether a publish may go through right now. `Err` carries the
    /// remaining cool-down.
    pub fn admit(&self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let reopens = self
                    .opened_at
                    .map(|at| at + self.config.cooldown())
                    .unwrap_or(now);
                Err(reopens.saturating_duration_since(now))
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                info!("circuit breaker closed after successful trial");
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip(now);
                    warn!(
                        "circuit breaker open after {} consecutive failures, cooling down {} ms",
                        self.consecutive_failures, self.config.cooldown_ms
                    );
                }
            }
            BreakerState::HalfOpen => {
                self.trip(now);
                warn!("half-open trial failed, circuit breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// How many times the breaker has tripped open.
    pub fn trips(&self) -> u64 {
        self.trips
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trips += 1;
    }
}
