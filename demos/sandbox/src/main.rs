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

// Kairos coordination sandbox
// Drives the frame coordinator through a calm phase, a load storm and a
// recovery, so every moving part (budget, bus, breaker, governor,
// telemetry) can be watched in the logs.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{info, trace, warn};

use kairos_control::bus::PublishOutcome;
use kairos_control::coordinator::FrameCoordinator;
use kairos_core::budget::SubsystemId;
use kairos_core::config::CoordinatorConfig;
use kairos_core::event::{
    EventKind, EventPayload, EventPriority, HandlerError, InputEvent, InterfaceNotice,
    PublishError, RuntimeEvent, SimulationCommand, SystemSignal, SystemSignalKind,
};
use kairos_core::telemetry::ExternalSignal;
use kairos_core::Stopwatch;
use kairos_telemetry::metrics::HistogramHandle;
use kairos_telemetry::{
    spawn_sampler, InMemoryBackend, MemoryMonitor, ScopedMetricTimer, TelemetryService,
};

/// One load profile the frame loop runs under.
struct Phase {
    name: &'static str,
    frames: u32,
    ui_ms: f64,
    sim_ask_ms: f64,
    sim_spike_ms: f64,
    /// Every n-th frame the simulation overshoots its grant; 0 disables.
    sim_spike_every: u32,
    high_events: u32,
    low_events: u32,
    /// Every n-th frame a collection tick is emitted; 0 disables.
    collect_every: u32,
    /// One-off low-priority flood: (frame index, event count).
    low_burst: Option<(u32, u32)>,
}

#[derive(Default)]
struct Tally {
    breaker_refusals: u32,
    backpressure_refusals: u32,
    shed_publishes: u32,
}

const CALM: Phase = Phase {
    name: "calm",
    frames: 120,
    ui_ms: 2.0,
    sim_ask_ms: 3.0,
    sim_spike_ms: 0.0,
    sim_spike_every: 0,
    high_events: 0,
    low_events: 1,
    collect_every: 96,
    low_burst: None,
};

const STORM: Phase = Phase {
    name: "storm",
    frames: 90,
    ui_ms: 6.0,
    sim_ask_ms: 8.0,
    sim_spike_ms: 12.0,
    sim_spike_every: 6,
    high_events: 3,
    low_events: 4,
    collect_every: 8,
    low_burst: Some((45, 300)),
};

const RECOVERY: Phase = Phase {
    name: "recovery",
    frames: 320,
    ui_ms: 2.0,
    sim_ask_ms: 3.0,
    sim_spike_ms: 0.0,
    sim_spike_every: 0,
    high_events: 1,
    low_events: 1,
    collect_every: 96,
    low_burst: None,
};

fn simulate_work(ms: f64) {
    if ms > 0.0 {
        thread::sleep(Duration::from_secs_f64(ms / 1000.0));
    }
}

fn track(result: Result<PublishOutcome, PublishError>, tally: &mut Tally) {
    match result {
        Ok(outcome) => {
            if outcome.dropped_oldest {
                tally.shed_publishes += 1;
            }
        }
        Err(PublishError::BreakerOpen { .. }) => tally.breaker_refusals += 1,
        Err(PublishError::Backpressure { .. }) => tally.backpressure_refusals += 1,
    }
}

fn run_phase(
    coordinator: &mut FrameCoordinator,
    phase: &Phase,
    sim_timer: &HistogramHandle,
    telemetry: &mut TelemetryService,
    tally: &mut Tally,
) {
    info!(
        "phase '{}' for {} frames ({:.1} ms ui, {:.1} ms simulation)",
        phase.name, phase.frames, phase.ui_ms, phase.sim_ask_ms
    );
    let collection_sender = coordinator.signal_sender();
    let mut frame_timer = Stopwatch::new();

    for frame in 0..phase.frames {
        frame_timer.restart();
        coordinator.begin_frame();

        // Interactive layer.
        if coordinator.allocate(SubsystemId::InteractiveLayer, phase.ui_ms) {
            simulate_work(phase.ui_ms);
            coordinator.report_usage(SubsystemId::InteractiveLayer, phase.ui_ms);
        }

        // Simulation layer, with periodic overshoot beyond its grant.
        if coordinator.allocate(SubsystemId::SimulationLayer, phase.sim_ask_ms) {
            let spiking = phase.sim_spike_every > 0 && frame % phase.sim_spike_every == 0;
            let actual = if spiking {
                phase.sim_spike_ms
            } else {
                phase.sim_ask_ms
            };
            {
                let _timer = ScopedMetricTimer::new(sim_timer);
                simulate_work(actual);
            }
            coordinator.report_usage(SubsystemId::SimulationLayer, actual);
        }

        // Event processing and runtime overhead round out the frame.
        if coordinator.allocate(SubsystemId::EventProcessing, 2.0) {
            coordinator.report_usage(SubsystemId::EventProcessing, 1.5);
        }
        if coordinator.allocate(SubsystemId::RuntimeOverhead, 1.0) {
            coordinator.report_usage(SubsystemId::RuntimeOverhead, 0.8);
        }

        track(
            coordinator.publish(RuntimeEvent::new(
                EventPayload::Input(InputEvent {
                    control: "stick".to_string(),
                    value: f64::from(frame % 32) / 32.0,
                }),
                EventPriority::Normal,
            )),
            tally,
        );
        for burst in 0..phase.high_events {
            track(
                coordinator.publish(RuntimeEvent::new(
                    EventPayload::Simulation(SimulationCommand {
                        command: "advance".to_string(),
                        magnitude: f64::from(burst + 1),
                    }),
                    EventPriority::High,
                )),
                tally,
            );
        }
        for _ in 0..phase.low_events {
            track(
                coordinator.publish(RuntimeEvent::new(
                    EventPayload::Interface(InterfaceNotice {
                        element: "ticker".to_string(),
                        message: format!("frame {frame}"),
                    }),
                    EventPriority::Low,
                )),
                tally,
            );
        }
        if let Some((at, count)) = phase.low_burst {
            if frame == at {
                info!("flooding {count} low-priority notices in one frame");
                for i in 0..count {
                    track(
                        coordinator.publish(RuntimeEvent::new(
                            EventPayload::Interface(InterfaceNotice {
                                element: "alert".to_string(),
                                message: format!("cascade {i}"),
                            }),
                            EventPriority::Low,
                        )),
                        tally,
                    );
                }
            }
        }
        if phase.collect_every > 0 && frame % phase.collect_every == 0 {
            let _ = collection_sender.try_send(ExternalSignal::CollectionTick);
        }

        coordinator.pump();
        telemetry.tick();
        coordinator.end_frame(frame_timer.elapsed_ms());
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    // A partial profile: everything not named keeps its default.
    let config = CoordinatorConfig::from_json_str(
        r#"{ "breaker": { "failure_threshold": 5, "cooldown_ms": 400 } }"#,
    )?;
    let mut coordinator = FrameCoordinator::new(config)?;
    let degrades = coordinator.degrade_events();

    // Subsystem handlers. The simulation handler turns flaky during the
    // storm, which is what eventually trips the breaker.
    let unstable = Rc::new(Cell::new(false));
    let flaky = unstable.clone();
    coordinator.subscribe(EventKind::Simulation, move |event| {
        if flaky.get() {
            return Err(HandlerError::new("simulation saturated"));
        }
        if let EventPayload::Simulation(command) = &event.payload {
            trace!("applying {} ({:.1})", command.command, command.magnitude);
        }
        Ok(())
    });
    coordinator.subscribe(EventKind::Input, |event| {
        if let EventPayload::Input(input) = &event.payload {
            trace!("input {} = {:.2}", input.control, input.value);
        }
        Ok(())
    });
    coordinator.subscribe(EventKind::Interface, |_| Ok(()));
    coordinator.subscribe(EventKind::System, |event| {
        if let EventPayload::System(signal) = &event.payload {
            info!("system signal: {:?}", signal.kind);
        }
        Ok(())
    });

    let overruns = Rc::new(Cell::new(0u32));
    let overrun_sink = overruns.clone();
    coordinator.on_budget_exceeded(move |budget| {
        overrun_sink.set(overrun_sink.get() + 1);
        trace!(
            "frame {} closed {:.2} ms in the red",
            budget.frame_id,
            -budget.remaining_ms
        );
    });

    // Telemetry: a memory monitor sampled off-thread into the coordinator,
    // plus demo-local metrics.
    let mut telemetry = TelemetryService::new(Duration::from_millis(500));
    let monitor = Arc::new(MemoryMonitor::new("sandbox-memory".to_string()));
    telemetry.monitor_registry().register(monitor.clone());
    let memory_sender = coordinator.signal_sender();
    let _sampler = spawn_sampler(
        monitor.clone(),
        Duration::from_millis(250),
        move |signal| {
            // Shed on a full channel; the next sample is fresher anyway.
            let _ = memory_sender.try_send(signal);
        },
    );
    let sim_timer = telemetry.metrics_registry().register_histogram(
        "sandbox.simulation_ms",
        "Simulation step wall time",
        "ms",
        vec![1.0, 4.0, 8.0, 16.0, 33.0],
    )?;

    let mut tally = Tally::default();

    run_phase(&mut coordinator, &CALM, &sim_timer, &mut telemetry, &mut tally);

    unstable.set(true);
    track(
        coordinator.publish(RuntimeEvent::new(
            EventPayload::System(SystemSignal {
                kind: SystemSignalKind::FocusLost,
            }),
            EventPriority::Immediate,
        )),
        &mut tally,
    );
    run_phase(&mut coordinator, &STORM, &sim_timer, &mut telemetry, &mut tally);

    unstable.set(false);
    let focus_regained = coordinator.publish(RuntimeEvent::new(
        EventPayload::System(SystemSignal {
            kind: SystemSignalKind::FocusGained,
        }),
        EventPriority::Immediate,
    ));
    if let Err(e) = focus_regained {
        warn!("focus signal refused while the bus recovers: {e}");
    }
    run_phase(
        &mut coordinator,
        &RECOVERY,
        &sim_timer,
        &mut telemetry,
        &mut tally,
    );
    coordinator.flush_events();

    // Wrap-up.
    let transitions: Vec<_> = degrades.try_iter().collect();
    for event in &transitions {
        let direction = if event.is_escalation() { "up" } else { "down" };
        info!(
            "pressure {} {} -> {} (frame {:.1} ms, {:.1} collections/s)",
            direction,
            event.from,
            event.to,
            event.snapshot.frame_time_ms,
            event.snapshot.collection_hz
        );
    }

    let metrics = coordinator.bus_metrics();
    let budget = coordinator.budget_stats();
    info!(
        "bus: {} published, {} delivered, {} failed, {} dropped, {} breaker refusals, {} backpressure refusals",
        metrics.published_events,
        metrics.delivered_events,
        metrics.failed_events,
        metrics.dropped_events,
        metrics.breaker_rejections,
        metrics.backpressure_rejections
    );
    info!(
        "budget: {} frames, {} grants, {} rejections, {} overrun frames ({} observer calls)",
        budget.frames_started,
        budget.grants,
        budget.rejections,
        budget.overrun_frames,
        overruns.get()
    );
    info!(
        "publisher-side: {} breaker refusals, {} backpressure refusals, {} shedding publishes",
        tally.breaker_refusals, tally.backpressure_refusals, tally.shed_publishes
    );
    info!(
        "settled at {} after {} transitions, average frame {:.2} ms",
        coordinator.pressure_state(),
        transitions.len(),
        coordinator.average_frame_time_ms()
    );
    if let Some(report) = monitor.memory_report() {
        info!(
            "memory: {:.1} MiB process (peak {:.1}), system pressure {}",
            report.process_mb(),
            report.process_peak_mb(),
            report.pressure_label()
        );
    }
    if let Some(backend) = telemetry
        .metrics_registry()
        .backend()
        .as_any()
        .downcast_ref::<InMemoryBackend>()
    {
        info!("telemetry export:\n{}", backend.export_json()?);
    }

    Ok(())
}
