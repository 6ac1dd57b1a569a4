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

//! The runtime event model: typed payloads, priority tiers and the
//! envelope the prioritized bus queues and dispatches.
//!
//! Everything here is plain data. The queueing, batching and circuit-breaker
//! policy live in `kairos-control`; this module only fixes the vocabulary the
//! subsystems agree on.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod channel;

pub use channel::EventChannel;

/// Unique identifier assigned to every event at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch urgency of an event.
///
/// Declaration order is dispatch order: the bus always drains `Immediate`
/// before `High`, `High` before `Normal`, and `Normal` before `Low`. The
/// derived `Ord` follows the same convention (`Immediate` sorts first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EventPriority {
    /// Dispatched synchronously at publish time, outside any batch cap.
    Immediate,
    /// Latency-sensitive work, drained ahead of the normal tier.
    High,
    /// The default tier for ordinary frame traffic.
    Normal,
    /// Deferrable work. May be shed oldest-first under sustained load.
    Low,
}

impl EventPriority {
    /// All tiers, in dispatch order.
    pub const ALL: [EventPriority; 4] = [
        EventPriority::Immediate,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventPriority::Immediate => "immediate",
            EventPriority::High => "high",
            EventPriority::Normal => "normal",
            EventPriority::Low => "low",
        };
        write!(f, "{label}")
    }
}

/// The family an event belongs to. Subscriptions are keyed by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Device input forwarded by the interactive layer.
    Input,
    /// Commands addressed to the simulation layer.
    Simulation,
    /// Notices surfaced by the interactive layer itself.
    Interface,
    /// Lifecycle and platform signals.
    System,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A device input sample (e.g. `control = "axis-x"`, `value = 0.35`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Logical control the sample came from.
    pub control: String,
    /// Normalized reading for the control.
    pub value: f64,
}

/// A command for the simulation layer, e.g. `command = "spawn-wave"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationCommand {
    /// Verb understood by the simulation layer.
    pub command: String,
    /// Scalar argument; meaning depends on the verb.
    pub magnitude: f64,
}

/// A notice from the interactive layer, e.g. a panel requesting focus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceNotice {
    /// Element that raised the notice.
    pub element: String,
    /// Human-readable detail.
    pub message: String,
}

/// Platform and lifecycle conditions carried by [`SystemSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemSignalKind {
    /// The host asked the runtime to shut down.
    ShutdownRequested,
    /// The window or surface lost focus.
    FocusLost,
    /// The window or surface regained focus.
    FocusGained,
    /// The platform reported memory pressure.
    LowMemory,
}

/// A lifecycle or platform signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSignal {
    /// Which condition fired.
    pub kind: SystemSignalKind,
}

/// The closed set of payloads the bus carries.
///
/// Subscribers match on the family via [`EventPayload::kind`]; adding a new
/// payload family is a deliberate API change, not a stringly-typed topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// See [`InputEvent`].
    Input(InputEvent),
    /// See [`SimulationCommand`].
    Simulation(SimulationCommand),
    /// See [`InterfaceNotice`].
    Interface(InterfaceNotice),
    /// See [`SystemSignal`].
    System(SystemSignal),
}

impl EventPayload {
    /// Returns the family this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Input(_) => EventKind::Input,
            EventPayload::Simulation(_) => EventKind::Simulation,
            EventPayload::Interface(_) => EventKind::Interface,
            EventPayload::System(_) => EventKind::System,
        }
    }
}

/// The envelope queued and dispatched by the prioritized bus.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    /// Unique identifier, assigned at creation.
    pub id: EventId,
    /// Typed payload.
    pub payload: EventPayload,
    /// Dispatch tier.
    pub priority: EventPriority,
    /// When the event was created.
    pub created_at: Instant,
    /// Optional cutoff. Events past their deadline are dropped instead of
    /// delivered, and the drop is counted.
    pub deadline: Option<Instant>,
}

impl RuntimeEvent {
    /// Creates an event stamped with a fresh id and the current time.
    pub fn new(payload: EventPayload, priority: EventPriority) -> Self {
        Self {
            id: EventId::new(),
            payload,
            priority,
            created_at: Instant::now(),
            deadline: None,
        }
    }

    /// Attaches a delivery deadline to the event.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the family of the carried payload.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Returns whether the deadline, if any, has passed at `now`.
    pub fn expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Time spent since creation, as seen from `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Why a `publish` call was refused.
///
/// Refusal is an ordinary return value: callers decide whether to retry,
/// shed the work or escalate. The bus itself never panics on load.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    /// The circuit breaker is open; no events are accepted until the
    /// cool-down elapses.
    BreakerOpen {
        /// Remaining cool-down at the time of the call.
        retry_in: Duration,
    },
    /// The tier's queue is at capacity and the event was not enqueued.
    Backpressure {
        /// Tier that refused the event.
        priority: EventPriority,
        /// Configured bound that was hit.
        capacity: usize,
    },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::BreakerOpen { retry_in } => {
                write!(
                    f,
                    "circuit breaker open, retry in {:.1} ms",
                    retry_in.as_secs_f64() * 1000.0
                )
            }
            PublishError::Backpressure { priority, capacity } => {
                write!(
                    f,
                    "backpressure on {priority} tier (capacity {capacity})"
                )
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// A failure reported by a subscriber while handling an event.
///
/// Handler failures feed the circuit breaker's consecutive-failure count.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates an error with a human-readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> EventPayload {
        EventPayload::Input(InputEvent {
            control: "axis-x".to_string(),
            value: 0.5,
        })
    }

    #[test]
    fn payload_kind_matches_family() {
        assert_eq!(sample_input().kind(), EventKind::Input);
        assert_eq!(
            EventPayload::Simulation(SimulationCommand {
                command: "advance".to_string(),
                magnitude: 1.0,
            })
            .kind(),
            EventKind::Simulation
        );
        assert_eq!(
            EventPayload::Interface(InterfaceNotice {
                element: "inventory".to_string(),
                message: "opened".to_string(),
            })
            .kind(),
            EventKind::Interface
        );
        assert_eq!(
            EventPayload::System(SystemSignal {
                kind: SystemSignalKind::FocusLost,
            })
            .kind(),
            EventKind::System
        );
    }

    #[test]
    fn priority_order_is_dispatch_order() {
        assert!(EventPriority::Immediate < EventPriority::High);
        assert!(EventPriority::High < EventPriority::Normal);
        assert!(EventPriority::Normal < EventPriority::Low);
        assert_eq!(EventPriority::ALL.len(), 4);
    }

    #[test]
    fn event_ids_are_unique() {
        let a = RuntimeEvent::new(sample_input(), EventPriority::Normal);
        let b = RuntimeEvent::new(sample_input(), EventPriority::Normal);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn deadline_expiry() {
        let now = Instant::now();
        let event = RuntimeEvent::new(sample_input(), EventPriority::Low)
            .with_deadline(now + Duration::from_millis(5));
        assert!(!event.expired(now));
        assert!(event.expired(now + Duration::from_millis(5)));
        assert!(event.expired(now + Duration::from_millis(50)));

        let no_deadline = RuntimeEvent::new(sample_input(), EventPriority::Low);
        assert!(!no_deadline.expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn age_is_measured_from_creation() {
        let event = RuntimeEvent::new(sample_input(), EventPriority::Normal);
        let later = event.created_at + Duration::from_millis(12);
        assert_eq!(event.age(later), Duration::from_millis(12));
        // An earlier observer clamps to zero instead of panicking.
        assert_eq!(event.age(event.created_at), Duration::ZERO);
    }

    #[test]
    fn publish_error_messages_name_the_cause() {
        let open = PublishError::BreakerOpen {
            retry_in: Duration::from_millis(250),
        };
        assert!(open.to_string().contains("circuit breaker open"));

        let full = PublishError::Backpressure {
            priority: EventPriority::Normal,
            capacity: 50,
        };
        let text = full.to_string();
        assert!(text.contains("normal"));
        assert!(text.contains("50"));
    }
}
