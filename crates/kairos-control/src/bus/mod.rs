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

//! The prioritized event bus.
//!
//! Events queue per priority tier and drain at flush points: a flush first
//! dispatches every immediate event individually, then drains the high,
//! normal and low tiers in that order, bounded by the batch cap so one flush
//! can never eat a whole frame. Immediate publishes and a full high tier
//! force a flush on the spot; everything else waits for a scheduled flush.
//!
//! Load never panics. The high and normal tiers refuse new events once
//! full ([`PublishError::Backpressure`]); the low tier sheds its oldest
//! event instead. A run of failing deliveries trips the circuit breaker,
//! which refuses publishes and defers flushes until a cool-down and a
//! successful trial dispatch.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use kairos_core::config::{BatchConfig, BreakerConfig, ConfigError};
use kairos_core::event::{EventKind, EventPriority, HandlerError, PublishError, RuntimeEvent};
use kairos_core::Stopwatch;
use log::{debug, error, trace, warn};

use crate::metrics::{RingBuffer, SAMPLE_WINDOW};

mod breaker;

pub use breaker::BreakerState;

use breaker::CircuitBreaker;

/// A subscriber callback. Handlers run on the coordination thread and must
/// not block; a failure feeds the circuit breaker.
pub type EventHandler = Box<dyn FnMut(&RuntimeEvent) -> Result<(), HandlerError>>;

/// Handle to a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// What happened to an accepted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOutcome {
    /// The publish triggered a synchronous flush.
    pub flushed: bool,
    /// Admitting the event shed the oldest low-tier event.
    pub dropped_oldest: bool,
}

/// What one flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Events delivered to their subscribers (or to none) without failure.
    pub delivered: usize,
    /// Events whose handlers failed.
    pub failed: usize,
    /// Events dropped past their deadline.
    pub dropped: usize,
    /// The flush stopped early because the breaker is open.
    pub deferred: bool,
}

impl FlushReport {
    /// Events taken off the queues by this flush.
    pub fn total(&self) -> usize {
        self.delivered + self.failed + self.dropped
    }
}

/// Monotonic counters and rolling timings, snapshotted on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BusMetrics {
    /// Events accepted by `publish`.
    pub published_events: u64,
    /// Events delivered without handler failure.
    pub delivered_events: u64,
    /// Events whose handlers failed.
    pub failed_events: u64,
    /// Events shed at the low-tier ceiling or dropped past deadline.
    pub dropped_events: u64,
    /// Publishes refused by the open breaker.
    pub breaker_rejections: u64,
    /// Publishes refused by a full tier.
    pub backpressure_rejections: u64,
    /// Rolling average handler execution time per event, in milliseconds.
    pub avg_processing_ms: f32,
    /// Rolling average queue-to-delivery latency, in milliseconds.
    pub avg_delivery_latency_ms: f32,
    /// Events queued across all tiers right now.
    pub queued_events: usize,
}

struct QueuedEvent {
    event: RuntimeEvent,
    enqueued_at: Instant,
}

/// The bus. Single-owner, driven from the coordination thread.
pub struct PriorityEventBus {
    batch: BatchConfig,
    queues: [VecDeque<QueuedEvent>; 4],
    subscriptions: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
    next_subscription: u64,
    breaker: CircuitBreaker,
    last_scheduled_flush: Instant,
    published_events: u64,
    delivered_events: u64,
    failed_events: u64,
    dropped_events: u64,
    breaker_rejections: u64,
    backpressure_rejections: u64,
    processing_window: RingBuffer<f32, SAMPLE_WINDOW>,
    latency_window: RingBuffer<f32, SAMPLE_WINDOW>,
}

impl PriorityEventBus {
    /// Creates a bus with validated batching and breaker profiles.
    pub fn new(batch: BatchConfig, breaker: BreakerConfig) -> Result<Self, ConfigError> {
        batch.validate()?;
        breaker.validate()?;
        Ok(Self {
            batch,
            queues: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
            subscriptions: HashMap::new(),
            next_subscription: 0,
            breaker: CircuitBreaker::new(breaker),
            last_scheduled_flush: Instant::now(),
            published_events: 0,
            delivered_events: 0,
            failed_events: 0,
            dropped_events: 0,
            breaker_rejections: 0,
            backpressure_rejections: 0,
            processing_window: RingBuffer::new(),
            latency_window: RingBuffer::new(),
        })
    }

    /// Registers a handler for one event kind. Handlers for the same kind
    /// run in registration order.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&RuntimeEvent) -> Result<(), HandlerError> + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        debug!("{id} registered for {kind} events");
        id
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for handlers in self.subscriptions.values_mut() {
            let before = handlers.len();
            handlers.retain(|(s, _)| *s != id);
            removed |= handlers.len() != before;
        }
        if removed {
            debug!("{id} removed");
        } else {
            warn!("unsubscribe for unknown {id}");
        }
        removed
    }

    /// Handlers currently registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, Vec::len)
    }

    /// Accepts an event onto its tier, or refuses it.
    ///
    /// An immediate event forces a synchronous flush. A high event forces
    /// one when its tier reaches the soft batch cap or its front has waited
    /// past the tier's max wait; a normal event only on max wait. Low events
    /// wait for scheduled flushes.
    ///
    /// Refusal is part of the contract: [`PublishError::BreakerOpen`] while
    /// the breaker cools down, [`PublishError::Backpressure`] when a bounded
    /// tier is full. Neither consumes the event.
    pub fn publish(&mut self, event: RuntimeEvent) -> Result<PublishOutcome, PublishError> {
        let now = Instant::now();
        self.breaker.poll(now);
        if let Err(retry_in) = self.breaker.admit(now) {
            self.breaker_rejections += 1;
            debug!(
                "publish refused: breaker open for another {:.1} ms",
                retry_in.as_secs_f64() * 1000.0
            );
            return Err(PublishError::BreakerOpen { retry_in });
        }

        let priority = event.priority;
        let mut outcome = PublishOutcome::default();
        match priority {
            // Immediate events are never refused at admission; they are
            // dispatched before this call returns.
            EventPriority::Immediate => {}
            EventPriority::Low => {
                let queue = &mut self.queues[EventPriority::Low as usize];
                if queue.len() >= self.batch.low_queue_ceiling {
                    if let Some(shed) = queue.pop_front() {
                        self.dropped_events += 1;
                        outcome.dropped_oldest = true;
                        debug!(
                            "low tier at ceiling {}: shed oldest event {}",
                            self.batch.low_queue_ceiling, shed.event.id
                        );
                    }
                }
            }
            EventPriority::High | EventPriority::Normal => {
                let len = self.queues[priority as usize].len();
                if len >= self.batch.max_batch_size {
                    self.backpressure_rejections += 1;
                    warn!("backpressure: {priority} tier full at {len} events");
                    return Err(PublishError::Backpressure {
                        priority,
                        capacity: self.batch.max_batch_size,
                    });
                }
            }
        }

        self.queues[priority as usize].push_back(QueuedEvent {
            event,
            enqueued_at: now,
        });
        self.published_events += 1;

        let flush_now = match priority {
            EventPriority::Immediate => true,
            EventPriority::High => {
                self.queues[priority as usize].len() >= self.batch.batch_size
                    || self.front_wait(priority, now) >= self.batch.max_wait(priority)
            }
            EventPriority::Normal => {
                self.front_wait(priority, now) >= self.batch.max_wait(priority)
            }
            EventPriority::Low => false,
        };
        if flush_now {
            outcome.flushed = true;
            self.flush_at(now);
        }
        Ok(outcome)
    }

    /// Drains the queues: every immediate event individually, then the
    /// batched tiers in priority order up to the batch cap in total.
    pub fn flush(&mut self) -> FlushReport {
        self.flush_at(Instant::now())
    }

    /// Runs a flush if the scheduled interval has elapsed since the last.
    pub fn maybe_flush(&mut self) -> Option<FlushReport> {
        let now = Instant::now();
        if now.saturating_duration_since(self.last_scheduled_flush) >= self.batch.flush_interval()
        {
            self.last_scheduled_flush = now;
            Some(self.flush_at(now))
        } else {
            None
        }
    }

    /// Events queued on one tier.
    pub fn queued_len(&self, priority: EventPriority) -> usize {
        self.queues[priority as usize].len()
    }

    /// Events queued across all tiers.
    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Current breaker position.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Snapshot of counters and rolling timings.
    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            published_events: self.published_events,
            delivered_events: self.delivered_events,
            failed_events: self.failed_events,
            dropped_events: self.dropped_events,
            breaker_rejections: self.breaker_rejections,
            backpressure_rejections: self.backpressure_rejections,
            avg_processing_ms: self.processing_window.average(),
            avg_delivery_latency_ms: self.latency_window.average(),
            queued_events: self.total_queued(),
        }
    }

    fn front_wait(&self, priority: EventPriority, now: Instant) -> Duration {
        self.queues[priority as usize]
            .front()
            .map(|q| now.saturating_duration_since(q.enqueued_at))
            .unwrap_or(Duration::ZERO)
    }

    fn flush_at(&mut self, now: Instant) -> FlushReport {
        let mut report = FlushReport::default();
        self.breaker.poll(now);
        if self.breaker.state() == BreakerState::Open {
            if self.total_queued() > 0 {
                debug!(
                    "flush deferred: breaker open with {} events waiting",
                    self.total_queued()
                );
            }
            report.deferred = true;
            return report;
        }

        // While half-open, the first dispatch below is the trial: a success
        // closes the breaker, a failure re-opens it and ends the flush.
        while let Some(queued) = self.queues[EventPriority::Immediate as usize].pop_front() {
            self.dispatch(queued, now, &mut report);
            if self.breaker.state() == BreakerState::Open {
                report.deferred = true;
                return report;
            }
        }

        let mut capacity = self.batch.max_batch_size;
        for priority in [EventPriority::High, EventPriority::Normal, EventPriority::Low] {
            while capacity > 0 {
                let queued = match self.queues[priority as usize].pop_front() {
                    Some(queued) => queued,
                    None => break,
                };
                capacity -= 1;
                self.dispatch(queued, now, &mut report);
                if self.breaker.state() == BreakerState::Open {
                    report.deferred = true;
                    return report;
                }
            }
        }
        report
    }

    fn dispatch(&mut self, queued: QueuedEvent, now: Instant, report: &mut FlushReport) {
        let QueuedEvent { event, .. } = queued;
        if event.expired(now) {
            self.dropped_events += 1;
            report.dropped += 1;
            debug!("dropped expired {} event {}", event.priority, event.id);
            return;
        }

        let latency_ms = event.age(now).as_secs_f64() * 1000.0;
        self.latency_window.push(latency_ms as f32);

        let kind = event.kind();
        let stopwatch = Stopwatch::new();
        let mut failed = false;
        match self.subscriptions.get_mut(&kind) {
            Some(handlers) if !handlers.is_empty() => {
                for (id, handler) in handlers.iter_mut() {
                    if let Err(e) = handler(&event) {
                        // Later subscribers still run; the event itself
                        // counts as failed.
                        error!("{id} failed on {kind} event {}: {e}", event.id);
                        failed = true;
                    }
                }
            }
            _ => {
                trace!("no subscribers for {kind} event {}", event.id);
            }
        }
        self.processing_window.push(stopwatch.elapsed_ms() as f32);

        if failed {
            self.failed_events += 1;
            report.failed += 1;
            self.breaker.record_failure(now);
        } else {
            self.delivered_events += 1;
            report.delivered += 1;
            self.breaker.record_success();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_core::event::{EventPayload, SimulationCommand, SystemSignal, SystemSignalKind};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::thread;

    fn bus() -> PriorityEventBus {
        PriorityEventBus::new(BatchConfig::default(), BreakerConfig::default()).unwrap()
    }

    fn bus_with(batch: BatchConfig, breaker: BreakerConfig) -> PriorityEventBus {
        PriorityEventBus::new(batch, breaker).unwrap()
    }

    // Long max-wait ceilings so a slow test machine cannot trip the
    // wait-based flush triggers mid-test.
    fn patient_batch() -> BatchConfig {
        BatchConfig {
            high_max_wait_ms: 1000,
            normal_max_wait_ms: 1000,
            ..BatchConfig::default()
        }
    }

    fn sim_event(magnitude: f64, priority: EventPriority) -> RuntimeEvent {
        RuntimeEvent::new(
            EventPayload::Simulation(SimulationCommand {
                command: "tick".to_string(),
                magnitude,
            }),
            priority,
        )
    }

    fn magnitude_recorder(bus: &mut PriorityEventBus) -> Rc<RefCell<Vec<f64>>> {
        let seen: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.subscribe(EventKind::Simulation, move |event| {
            if let EventPayload::Simulation(c) = &event.payload {
                sink.borrow_mut().push(c.magnitude);
            }
            Ok(())
        });
        seen
    }

    #[test]
    fn immediate_event_dispatches_during_publish() {
        let mut bus = bus();
        let seen = magnitude_recorder(&mut bus);

        let outcome = bus.publish(sim_event(1.0, EventPriority::Immediate)).unwrap();

        assert!(outcome.flushed);
        assert_eq!(seen.borrow().as_slice(), &[1.0]);
        assert_eq!(bus.total_queued(), 0);
    }

    #[test]
    fn immediate_flush_drains_queued_tiers_in_priority_order() {
        let mut bus = bus_with(patient_batch(), BreakerConfig::default());
        let seen = magnitude_recorder(&mut bus);

        bus.publish(sim_event(30.0, EventPriority::Low)).unwrap();
        bus.publish(sim_event(20.0, EventPriority::Normal)).unwrap();
        bus.publish(sim_event(10.0, EventPriority::High)).unwrap();
        assert_eq!(seen.borrow().len(), 0);

        bus.publish(sim_event(0.0, EventPriority::Immediate)).unwrap();

        assert_eq!(seen.borrow().as_slice(), &[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(bus.total_queued(), 0);
    }

    #[test]
    fn tiers_drain_in_priority_order_with_fifo_within_a_tier() {
        let mut bus = bus_with(patient_batch(), BreakerConfig::default());
        let seen = magnitude_recorder(&mut bus);

        bus.publish(sim_event(21.0, EventPriority::Normal)).unwrap();
        bus.publish(sim_event(11.0, EventPriority::High)).unwrap();
        bus.publish(sim_event(22.0, EventPriority::Normal)).unwrap();
        bus.publish(sim_event(12.0, EventPriority::High)).unwrap();

        let report = bus.flush();

        assert_eq!(report.delivered, 4);
        assert_eq!(seen.borrow().as_slice(), &[11.0, 12.0, 21.0, 22.0]);
    }

    #[test]
    fn low_tier_drains_in_batch_caps_across_flushes() {
        let mut bus = bus();
        let seen = magnitude_recorder(&mut bus);

        for i in 0..150 {
            bus.publish(sim_event(i as f64, EventPriority::Low)).unwrap();
        }
        assert_eq!(bus.queued_len(EventPriority::Low), 150);

        let first = bus.flush();
        assert_eq!(first.delivered, 50);
        assert_eq!(bus.queued_len(EventPriority::Low), 100);

        let second = bus.flush();
        assert_eq!(second.delivered, 50);
        assert_eq!(bus.queued_len(EventPriority::Low), 50);

        let third = bus.flush();
        assert_eq!(third.delivered, 50);
        assert_eq!(bus.queued_len(EventPriority::Low), 0);

        assert_eq!(seen.borrow().len(), 150);
        // FIFO held across all three cycles.
        assert_eq!(seen.borrow()[0], 0.0);
        assert_eq!(seen.borrow()[149], 149.0);

        let idle = bus.flush();
        assert_eq!(idle.total(), 0);
    }

    #[test]
    fn low_tier_sheds_oldest_at_the_ceiling() {
        let batch = BatchConfig {
            low_queue_ceiling: 100,
            ..BatchConfig::default()
        };
        let mut bus = bus_with(batch, BreakerConfig::default());
        let seen = magnitude_recorder(&mut bus);

        for i in 0..100 {
            let outcome = bus.publish(sim_event(i as f64, EventPriority::Low)).unwrap();
            assert!(!outcome.dropped_oldest);
        }
        let outcome = bus.publish(sim_event(100.0, EventPriority::Low)).unwrap();
        assert!(outcome.dropped_oldest);
        assert_eq!(bus.queued_len(EventPriority::Low), 100);

        for i in 101..150 {
            bus.publish(sim_event(i as f64, EventPriority::Low)).unwrap();
        }
        assert_eq!(bus.metrics().dropped_events, 50);
        assert_eq!(bus.queued_len(EventPriority::Low), 100);

        bus.flush();
        // Events 0..49 were shed, so the first delivery is the 51st publish.
        assert_eq!(seen.borrow()[0], 50.0);
    }

    #[test]
    fn normal_tier_backpressure_when_publishes_outpace_flushes() {
        let mut bus = bus_with(patient_batch(), BreakerConfig::default());
        for i in 0..50 {
            bus.publish(sim_event(i as f64, EventPriority::Normal)).unwrap();
        }

        let err = bus.publish(sim_event(50.0, EventPriority::Normal)).unwrap_err();
        assert_eq!(
            err,
            PublishError::Backpressure {
                priority: EventPriority::Normal,
                capacity: 50,
            }
        );
        assert_eq!(bus.queued_len(EventPriority::Normal), 50);
        assert_eq!(bus.metrics().backpressure_rejections, 1);

        // Draining the tier makes room again.
        bus.flush();
        assert!(bus.publish(sim_event(50.0, EventPriority::Normal)).is_ok());
    }

    #[test]
    fn high_tier_forces_a_flush_at_the_soft_cap() {
        let mut bus = bus_with(patient_batch(), BreakerConfig::default());
        let seen = magnitude_recorder(&mut bus);

        for i in 0..15 {
            let outcome = bus.publish(sim_event(i as f64, EventPriority::High)).unwrap();
            assert!(!outcome.flushed);
        }
        let outcome = bus.publish(sim_event(15.0, EventPriority::High)).unwrap();

        assert!(outcome.flushed);
        assert_eq!(seen.borrow().len(), 16);
        assert_eq!(bus.queued_len(EventPriority::High), 0);
    }

    #[test]
    fn breaker_opens_after_consecutive_failures_then_recovers() {
        let breaker = BreakerConfig {
            failure_threshold: 3,
            cooldown_ms: 40,
        };
        let mut bus = bus_with(patient_batch(), breaker);

        let healthy = Rc::new(Cell::new(false));
        let flag = Rc::clone(&healthy);
        bus.subscribe(EventKind::Simulation, move |_| {
            if flag.get() {
                Ok(())
            } else {
                Err(HandlerError::new("subsystem offline"))
            }
        });

        for i in 0..3 {
            bus.publish(sim_event(i as f64, EventPriority::Normal)).unwrap();
        }
        let report = bus.flush();
        assert_eq!(report.failed, 3);
        assert_eq!(bus.breaker_state(), BreakerState::Open);

        // The very next publish is refused.
        let err = bus.publish(sim_event(99.0, EventPriority::Normal)).unwrap_err();
        assert!(matches!(err, PublishError::BreakerOpen { .. }));
        assert_eq!(bus.metrics().breaker_rejections, 1);

        thread::sleep(Duration::from_millis(60));
        healthy.set(true);

        // After the cool-down the breaker admits again; the first dispatch
        // is the trial and its success closes the breaker.
        bus.publish(sim_event(100.0, EventPriority::Normal)).unwrap();
        assert_eq!(bus.breaker_state(), BreakerState::HalfOpen);
        let report = bus.flush();
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.breaker_state(), BreakerState::Closed);

        bus.publish(sim_event(101.0, EventPriority::Normal)).unwrap();
        let report = bus.flush();
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn open_breaker_defers_flushes_and_keeps_events_queued() {
        let breaker = BreakerConfig {
            failure_threshold: 2,
            cooldown_ms: 30,
        };
        let mut bus = bus_with(patient_batch(), breaker);

        let healthy = Rc::new(Cell::new(false));
        let flag = Rc::clone(&healthy);
        bus.subscribe(EventKind::Simulation, move |_| {
            if flag.get() {
                Ok(())
            } else {
                Err(HandlerError::new("still down"))
            }
        });

        for i in 0..4 {
            bus.publish(sim_event(i as f64, EventPriority::Normal)).unwrap();
        }
        let report = bus.flush();
        assert_eq!(report.failed, 2);
        assert!(report.deferred);
        assert_eq!(bus.queued_len(EventPriority::Normal), 2);

        // Still open: nothing moves.
        let report = bus.flush();
        assert!(report.deferred);
        assert_eq!(report.total(), 0);
        assert_eq!(bus.queued_len(EventPriority::Normal), 2);

        thread::sleep(Duration::from_millis(40));
        healthy.set(true);
        let report = bus.flush();
        assert_eq!(report.delivered, 2);
        assert!(!report.deferred);
        assert_eq!(bus.breaker_state(), BreakerState::Closed);
        assert_eq!(bus.total_queued(), 0);
    }

    #[test]
    fn failed_trial_reopens_the_breaker() {
        let breaker = BreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 20,
        };
        let mut bus = bus_with(patient_batch(), breaker);
        bus.subscribe(EventKind::Simulation, |_| {
            Err(HandlerError::new("permanently broken"))
        });

        bus.publish(sim_event(0.0, EventPriority::Normal)).unwrap();
        bus.publish(sim_event(1.0, EventPriority::Normal)).unwrap();
        let report = bus.flush();
        assert_eq!(report.failed, 1);
        assert_eq!(bus.breaker_state(), BreakerState::Open);

        thread::sleep(Duration::from_millis(30));
        let report = bus.flush();
        // The trial consumed one event, failed and re-opened the breaker.
        assert_eq!(report.failed, 1);
        assert!(report.deferred);
        assert_eq!(bus.breaker_state(), BreakerState::Open);
        assert!(bus.publish(sim_event(2.0, EventPriority::Normal)).is_err());
    }

    #[test]
    fn expired_events_are_dropped_not_failed() {
        let mut bus = bus();
        let seen = magnitude_recorder(&mut bus);

        let event = sim_event(1.0, EventPriority::Low)
            .with_deadline(Instant::now() + Duration::from_millis(2));
        bus.publish(event).unwrap();
        thread::sleep(Duration::from_millis(10));

        let report = bus.flush();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.failed, 0);
        assert!(seen.borrow().is_empty());
        assert_eq!(bus.metrics().dropped_events, 1);
        assert_eq!(bus.breaker_state(), BreakerState::Closed);
    }

    #[test]
    fn events_without_subscribers_still_count_delivered() {
        let mut bus = bus();
        bus.publish(sim_event(1.0, EventPriority::Normal)).unwrap();
        let report = bus.flush();
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.metrics().delivered_events, 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = bus();
        let seen: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = bus.subscribe(EventKind::Simulation, move |event| {
            if let EventPayload::Simulation(c) = &event.payload {
                sink.borrow_mut().push(c.magnitude);
            }
            Ok(())
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(EventKind::Simulation), 0);

        bus.publish(sim_event(1.0, EventPriority::Normal)).unwrap();
        bus.flush();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn failing_handler_does_not_starve_later_subscribers() {
        let mut bus = bus();
        bus.subscribe(EventKind::System, |_| Err(HandlerError::new("boom")));
        let seen = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&seen);
        bus.subscribe(EventKind::System, move |_| {
            sink.set(sink.get() + 1);
            Ok(())
        });

        bus.publish(RuntimeEvent::new(
            EventPayload::System(SystemSignal {
                kind: SystemSignalKind::FocusLost,
            }),
            EventPriority::Normal,
        ))
        .unwrap();
        let report = bus.flush();

        assert_eq!(seen.get(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(bus.metrics().failed_events, 1);
    }

    #[test]
    fn rolling_averages_track_processing_and_latency() {
        let mut bus = bus();
        bus.subscribe(EventKind::Simulation, |_| {
            thread::sleep(Duration::from_millis(2));
            Ok(())
        });

        for i in 0..3 {
            bus.publish(sim_event(i as f64, EventPriority::Normal)).unwrap();
        }
        thread::sleep(Duration::from_millis(5));
        bus.flush();

        let metrics = bus.metrics();
        assert_eq!(metrics.delivered_events, 3);
        assert!(metrics.avg_processing_ms >= 1.0);
        assert!(metrics.avg_delivery_latency_ms >= 4.0);
    }

    #[test]
    fn maybe_flush_respects_the_interval() {
        let batch = BatchConfig {
            flush_interval_ms: 20,
            ..BatchConfig::default()
        };
        let mut bus = bus_with(batch, BreakerConfig::default());
        bus.publish(sim_event(1.0, EventPriority::Low)).unwrap();

        assert!(bus.maybe_flush().is_none());
        thread::sleep(Duration::from_millis(30));
        let report = bus.maybe_flush().expect("interval elapsed");
        assert_eq!(report.delivered, 1);
        assert!(bus.maybe_flush().is_none());
    }

    #[test]
    fn mixed_tiers_share_one_batch_cap_per_flush() {
        let batch = BatchConfig {
            batch_size: 50,
            max_batch_size: 50,
            ..patient_batch()
        };
        let mut bus = bus_with(batch, BreakerConfig::default());
        let seen = magnitude_recorder(&mut bus);

        for i in 0..30 {
            bus.publish(sim_event(i as f64, EventPriority::High)).unwrap();
        }
        for i in 100..130 {
            bus.publish(sim_event(i as f64, EventPriority::Normal)).unwrap();
        }

        let report = bus.flush();
        assert_eq!(report.delivered, 50);
        // All 30 high events went first, then 20 normal.
        assert_eq!(seen.borrow()[29], 29.0);
        assert_eq!(seen.borrow()[30], 100.0);
        assert_eq!(bus.queued_len(EventPriority::Normal), 10);
    }

    #[test]
    fn invalid_profiles_are_refused_at_construction() {
        let batch = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(PriorityEventBus::new(batch, BreakerConfig::default()).is_err());

        let breaker = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        assert!(PriorityEventBus::new(BatchConfig::default(), breaker).is_err());
    }
}
