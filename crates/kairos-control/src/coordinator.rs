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

//! The frame coordinator: one facade over the budget manager, the event
//! bus, the governor and the external-signal hub.
//!
//! A host drives it with the frame lifecycle:
//!
//! 1. [`begin_frame`](FrameCoordinator::begin_frame) drains background
//!    signals and opens a fresh budget ledger.
//! 2. Subsystems call [`allocate`](FrameCoordinator::allocate) before work
//!    and [`report_usage`](FrameCoordinator::report_usage) after, while
//!    [`publish`](FrameCoordinator::publish) and
//!    [`pump`](FrameCoordinator::pump) move events.
//! 3. [`end_frame`](FrameCoordinator::end_frame) folds the frame's timings
//!    into a health snapshot and lets the governor judge it.
//!
//! Everything runs on the caller's thread; only the signal hub's senders
//! cross threads.

use std::time::Instant;

use kairos_core::budget::{BudgetConfig, FrameBudget, SubsystemId};
use kairos_core::config::{ConfigError, CoordinatorConfig};
use kairos_core::event::{
    EventChannel, EventKind, EventPriority, HandlerError, PublishError, RuntimeEvent,
};
use kairos_core::pressure::{DegradeEvent, PerformanceSnapshot, PressureState};
use kairos_core::telemetry::{ExternalSignal, MetricId};
use log::{error, info, trace};

use crate::budget::{BudgetStats, FrameBudgetManager, ObserverId};
use crate::bus::{
    BreakerState, BusMetrics, FlushReport, PriorityEventBus, PublishOutcome, SubscriptionId,
};
use crate::governor::PerformanceGovernor;
use crate::metrics::MetricStore;
use crate::signal::SignalHub;

/// Ties the coordination components together behind one frame-loop API.
pub struct FrameCoordinator {
    config: CoordinatorConfig,
    budget: FrameBudgetManager,
    bus: PriorityEventBus,
    governor: PerformanceGovernor,
    signals: SignalHub,
    degrade_channel: EventChannel<DegradeEvent>,
    store: MetricStore,
    frame_time_id: MetricId,
    latency_id: MetricId,
    queue_id: MetricId,
    memory_id: MetricId,
    frames_completed: u64,
}

impl FrameCoordinator {
    /// Builds a coordinator from a validated profile.
    pub fn new(config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let budget = FrameBudgetManager::new(config.budget)?;
        let bus = PriorityEventBus::new(config.batch, config.breaker)?;
        let governor = PerformanceGovernor::new(config.thresholds, config.recovery)?;
        let signals = SignalHub::new(config.signal_buffer_size);
        info!(
            "frame coordinator ready: {:.1} ms budget, batch cap {}, breaker threshold {}",
            config.budget.total_ms, config.batch.max_batch_size, config.breaker.failure_threshold
        );
        Ok(Self {
            config,
            budget,
            bus,
            governor,
            signals,
            degrade_channel: EventChannel::new(),
            store: MetricStore::new(),
            frame_time_id: MetricId::new("coordinator.frame_time_ms"),
            latency_id: MetricId::new("coordinator.event_latency_ms"),
            queue_id: MetricId::new("coordinator.queued_events"),
            memory_id: MetricId::new("coordinator.memory_mb"),
            frames_completed: 0,
        })
    }

    /// Opens a frame: drains background signals and resets the budget
    /// ledger. Returns the new frame's id.
    pub fn begin_frame(&mut self) -> u64 {
        self.signals.drain(Instant::now());
        self.budget.reset_frame();
        self.budget.current_budget().frame_id
    }

    /// Closes a frame with the caller's measured wall time and lets the
    /// governor judge it. Returns the pressure transition, if one happened;
    /// the same event is also delivered on
    /// [`degrade_events`](FrameCoordinator::degrade_events).
    pub fn end_frame(&mut self, frame_time_ms: f64) -> Option<DegradeEvent> {
        let now = Instant::now();
        let bus_metrics = self.bus.metrics();
        let snapshot = PerformanceSnapshot {
            frame_time_ms,
            event_latency_ms: f64::from(bus_metrics.avg_delivery_latency_ms),
            memory_mb: self.signals.memory_mb(),
            collection_hz: self.signals.collection_rate_hz(now),
            queue_length: bus_metrics.queued_events,
            captured_at: now,
        };

        self.store
            .record(self.frame_time_id.clone(), frame_time_ms as f32);
        self.store
            .record(self.latency_id.clone(), bus_metrics.avg_delivery_latency_ms);
        self.store
            .record(self.queue_id.clone(), bus_metrics.queued_events as f32);
        self.store
            .record(self.memory_id.clone(), snapshot.memory_mb as f32);

        let transition = self.governor.evaluate(&snapshot);
        if let Some(event) = transition {
            if self.degrade_channel.send(event).is_err() {
                error!("degrade channel closed; {} -> {} lost", event.from, event.to);
            }
        }

        self.frames_completed += 1;
        trace!(
            "frame {} closed: {:.2} ms, {} queued, {}",
            self.budget.current_budget().frame_id,
            frame_time_ms,
            snapshot.queue_length,
            self.governor.state()
        );
        transition
    }

    // --- Budget ---

    /// Requests `time_ms` for a subsystem this frame. `false` means the
    /// request was refused and nothing was charged.
    pub fn allocate(&mut self, subsystem: SubsystemId, time_ms: f64) -> bool {
        self.budget.allocate(subsystem, time_ms)
    }

    /// Reconciles a subsystem's grant with what it actually spent.
    pub fn report_usage(&mut self, subsystem: SubsystemId, actual_ms: f64) {
        self.budget.report_usage(subsystem, actual_ms)
    }

    /// Unallocated time left in the open frame, in milliseconds.
    pub fn remaining_budget(&self) -> f64 {
        self.budget.remaining_budget()
    }

    /// Snapshot of the open frame's ledger.
    pub fn current_budget(&self) -> FrameBudget {
        self.budget.current_budget()
    }

    /// Registers an observer for budget overruns.
    pub fn on_budget_exceeded(
        &mut self,
        observer: impl FnMut(&FrameBudget) + 'static,
    ) -> ObserverId {
        self.budget.on_budget_exceeded(observer)
    }

    /// Removes a budget observer. Returns whether it existed.
    pub fn remove_budget_observer(&mut self, id: ObserverId) -> bool {
        self.budget.remove_observer(id)
    }

    // --- Events ---

    /// Publishes an event onto the bus. See [`PriorityEventBus::publish`].
    pub fn publish(&mut self, event: RuntimeEvent) -> Result<PublishOutcome, PublishError> {
        self.bus.publish(event)
    }

    /// Registers a handler for one event kind.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&RuntimeEvent) -> Result<(), HandlerError> + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(kind, handler)
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Runs a scheduled flush if the flush interval has elapsed. Call this
    /// from spare moments in the frame.
    pub fn pump(&mut self) -> Option<FlushReport> {
        self.bus.maybe_flush()
    }

    /// Drains queued events unconditionally.
    pub fn flush_events(&mut self) -> FlushReport {
        self.bus.flush()
    }

    /// Events waiting on one tier.
    pub fn queued_len(&self, priority: EventPriority) -> usize {
        self.bus.queued_len(priority)
    }

    // --- Signals and introspection ---

    /// A sender for background samplers to push [`ExternalSignal`]s.
    pub fn signal_sender(&self) -> crossbeam_channel::Sender<ExternalSignal> {
        self.signals.sender()
    }

    /// A receiver that observes every pressure transition.
    pub fn degrade_events(&self) -> flume::Receiver<DegradeEvent> {
        self.degrade_channel.receiver().clone()
    }

    /// Current position on the degradation ladder.
    pub fn pressure_state(&self) -> PressureState {
        self.governor.state()
    }

    /// Current breaker state on the bus.
    pub fn breaker_state(&self) -> BreakerState {
        self.bus.breaker_state()
    }

    /// Bus counters and rolling timings.
    pub fn bus_metrics(&self) -> BusMetrics {
        self.bus.metrics()
    }

    /// Budget counters.
    pub fn budget_stats(&self) -> BudgetStats {
        self.budget.stats()
    }

    /// Rolling windows of the coordinator's own frame metrics.
    pub fn metric_store(&self) -> &MetricStore {
        &self.store
    }

    /// Rolling average frame time over the sample window, in milliseconds.
    pub fn average_frame_time_ms(&self) -> f32 {
        self.store.average(&self.frame_time_id).unwrap_or(0.0)
    }

    /// Frames closed since construction.
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// The profile this coordinator was built from.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_core::event::{EventPayload, SimulationCommand};
    use kairos_core::pressure::{PerformanceThresholds, RecoveryPolicy};
    use std::cell::Cell;
    use std::rc::Rc;

    fn command_event(priority: EventPriority, magnitude: f64) -> RuntimeEvent {
        RuntimeEvent::new(
            EventPayload::Simulation(SimulationCommand {
                command: "advance".to_string(),
                magnitude,
            }),
            priority,
        )
    }

    #[test]
    fn frame_lifecycle_ties_the_parts_together() {
        let mut coordinator = FrameCoordinator::new(CoordinatorConfig::default()).unwrap();
        let delivered = Rc::new(Cell::new(0u32));
        let seen = delivered.clone();
        coordinator.subscribe(EventKind::Simulation, move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        });

        let frame = coordinator.begin_frame();
        assert!(coordinator.allocate(SubsystemId::SimulationLayer, 6.0));
        coordinator
            .publish(command_event(EventPriority::Normal, 1.0))
            .unwrap();
        coordinator.flush_events();
        coordinator.report_usage(SubsystemId::SimulationLayer, 5.5);
        assert!(coordinator.end_frame(12.0).is_none());

        assert_eq!(delivered.get(), 1);
        assert_eq!(coordinator.frames_completed(), 1);
        assert_eq!(coordinator.pressure_state(), PressureState::Normal);
        assert!(coordinator.begin_frame() > frame);
    }

    #[test]
    fn slow_frames_degrade_and_notify_the_channel() {
        let config = CoordinatorConfig {
            recovery: RecoveryPolicy {
                consecutive_healthy_required: 1,
                min_dwell_ms: 0,
                ..RecoveryPolicy::default()
            },
            ..CoordinatorConfig::default()
        };
        let mut coordinator = FrameCoordinator::new(config).unwrap();
        let degrades = coordinator.degrade_events();

        coordinator.begin_frame();
        let event = coordinator.end_frame(20.0).expect("degrade");
        assert_eq!(event.from, PressureState::Normal);
        assert_eq!(event.to, PressureState::Degraded);
        assert!((event.snapshot.frame_time_ms - 20.0).abs() < 0.001);

        let received = degrades.try_recv().expect("channel copy");
        assert_eq!(received.to, PressureState::Degraded);

        // A healthy frame steps straight back down under this profile.
        coordinator.begin_frame();
        let recovery = coordinator.end_frame(5.0).expect("recover");
        assert_eq!(recovery.to, PressureState::Normal);
        assert_eq!(recovery.trigger, None);
    }

    #[test]
    fn repeated_pressure_does_not_cascade_in_one_frame() {
        let mut coordinator = FrameCoordinator::new(CoordinatorConfig::default()).unwrap();

        coordinator.begin_frame();
        assert!(coordinator.end_frame(20.0).is_some());
        for _ in 0..3 {
            coordinator.begin_frame();
            assert!(coordinator.end_frame(20.0).is_none());
        }
        assert_eq!(coordinator.pressure_state(), PressureState::Degraded);
    }

    #[test]
    fn external_memory_samples_reach_the_governor() {
        let thresholds = PerformanceThresholds::default();
        let mut coordinator = FrameCoordinator::new(CoordinatorConfig {
            thresholds,
            ..CoordinatorConfig::default()
        })
        .unwrap();
        let sender = coordinator.signal_sender();
        sender
            .try_send(ExternalSignal::MemorySample {
                used_mb: thresholds.normal.max_memory_mb + 64.0,
            })
            .unwrap();

        coordinator.begin_frame();
        let event = coordinator.end_frame(4.0).expect("memory degrade");
        assert_eq!(
            event.trigger,
            Some(kairos_core::pressure::DegradeTrigger::MemoryPressure)
        );
        assert!(event.snapshot.memory_mb > thresholds.normal.max_memory_mb);
    }

    #[test]
    fn budget_flows_through_the_facade() {
        let mut coordinator = FrameCoordinator::new(CoordinatorConfig::default()).unwrap();
        let overruns = Rc::new(Cell::new(0u32));
        let seen = overruns.clone();
        coordinator.on_budget_exceeded(move |budget| {
            assert!(budget.overrun);
            seen.set(seen.get() + 1);
        });

        coordinator.begin_frame();
        assert!(coordinator.allocate(SubsystemId::InteractiveLayer, 10.0));
        assert!(!coordinator.allocate(SubsystemId::SimulationLayer, 10.0));
        coordinator.report_usage(SubsystemId::InteractiveLayer, 18.0);

        assert_eq!(overruns.get(), 1);
        assert!(coordinator.remaining_budget() < 0.0);
        assert!(coordinator.current_budget().overrun);
        assert_eq!(coordinator.budget_stats().rejections, 1);
    }

    #[test]
    fn frame_metrics_accumulate_in_the_store() {
        let mut coordinator = FrameCoordinator::new(CoordinatorConfig::default()).unwrap();
        for _ in 0..4 {
            coordinator.begin_frame();
            coordinator.end_frame(10.0);
        }
        assert!((coordinator.average_frame_time_ms() - 10.0).abs() < 0.001);
        assert!(coordinator
            .metric_store()
            .last(&MetricId::new("coordinator.queued_events"))
            .is_some());
    }

    #[test]
    fn publish_errors_surface_through_the_facade() {
        // Long max waits so a slow test machine cannot flush mid-loop.
        let config = CoordinatorConfig {
            batch: kairos_core::config::BatchConfig {
                high_max_wait_ms: 10_000,
                normal_max_wait_ms: 10_000,
                ..kairos_core::config::BatchConfig::default()
            },
            ..CoordinatorConfig::default()
        };
        let mut coordinator = FrameCoordinator::new(config).unwrap();
        let cap = config.batch.max_batch_size;

        for i in 0..cap {
            coordinator
                .publish(command_event(EventPriority::Normal, i as f64))
                .unwrap();
        }
        let refused = coordinator
            .publish(command_event(EventPriority::Normal, 999.0))
            .unwrap_err();
        assert_eq!(
            refused,
            PublishError::Backpressure {
                priority: EventPriority::Normal,
                capacity: cap,
            }
        );
        assert_eq!(coordinator.bus_metrics().backpressure_rejections, 1);
    }
}
