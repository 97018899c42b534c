//! Monitoring Loop.
//!
//! `Initializing -> Running -> Halted`. One cycle:
//! 1. take the shared boundary, scan every lane with the current overrides,
//!    publish fresh lanes, recompute the aggregate, release
//! 2. diff readings against the last known statuses; capture one incident
//!    per transition, using the transition's lane frame
//! 3. signal the controller
//! 4. upsert overview and slot rows
//!
//! A lane whose read fails keeps its previous frame and count. Only
//! `CycleFailure::Fatal` stops the loop; everything else is logged and the
//! loop cools down and carries on.

use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ParkingdConfig;
use crate::detect::OccupancyBackend;
use crate::incident::{CaptureOutcome, IncidentCapturer};
use crate::ingest::{open_source, FrameSource};
use crate::lane::{scan_lane, LaneLayout, LaneResult, SlotReading};
use crate::signal::{HardwareSignaler, SignalReport};
use crate::sink::{OverviewRecord, PersistenceSink};
use crate::state::{AggregateStatus, SharedState};
use crate::tracker::{StateTracker, TransitionEvent};
use crate::LaneId;

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Running,
    Halted,
}

#[derive(Debug, Error)]
pub enum CycleFailure {
    /// Logged; the loop sleeps the cooldown and retries.
    #[error("cycle failed: {0:#}")]
    Transient(anyhow::Error),
    /// The loop halts.
    #[error("monitor halted: {0:#}")]
    Fatal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("camera for lane {lane} ({camera_id}) failed to open: {reason}")]
    CameraUnavailable {
        lane: LaneId,
        camera_id: String,
        reason: String,
    },
}

/// A lane's static layout plus its live camera.
pub struct LaneRuntime {
    pub layout: LaneLayout,
    pub source: Box<dyn FrameSource>,
}

/// Open every configured camera. Any failure is fatal for startup.
pub fn acquire_cameras(config: &ParkingdConfig) -> Result<Vec<LaneRuntime>, StartError> {
    config
        .lanes
        .iter()
        .zip(config.lane_layouts())
        .map(|(lane, layout)| {
            let source = open_source(&lane.source, lane.frame_width, lane.frame_height)
                .map_err(|err| StartError::CameraUnavailable {
                    lane: layout.lane,
                    camera_id: layout.camera_id.clone(),
                    reason: format!("{:#}", err),
                })?;
            log::info!(
                "lane {} ({}): camera {}",
                layout.lane,
                layout.camera_id,
                source.describe()
            );
            Ok(LaneRuntime { layout, source })
        })
        .collect()
}

/// Collaborators handed to the monitor.
pub struct MonitorParts {
    pub lanes: Vec<LaneRuntime>,
    pub classifier: Box<dyn OccupancyBackend>,
    pub state: Arc<SharedState>,
    pub signaler: HardwareSignaler,
    pub capturer: Arc<IncidentCapturer>,
    pub sink: Option<Arc<dyn PersistenceSink>>,
    pub cycle_interval: Duration,
    pub cooldown: Duration,
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub scanned: Vec<LaneId>,
    pub failed_lanes: Vec<LaneId>,
    pub aggregate: AggregateStatus,
    pub transitions: Vec<TransitionEvent>,
    pub captures: Vec<CaptureOutcome>,
    pub signals: SignalReport,
}

pub struct Monitor {
    lanes: Vec<LaneRuntime>,
    classifier: Box<dyn OccupancyBackend>,
    shared: Arc<SharedState>,
    signaler: HardwareSignaler,
    capturer: Arc<IncidentCapturer>,
    sink: Option<Arc<dyn PersistenceSink>>,
    cycle_interval: Duration,
    cooldown: Duration,
    tracker: StateTracker,
    state: MonitorState,
}

impl Monitor {
    pub fn new(parts: MonitorParts) -> Self {
        Self {
            lanes: parts.lanes,
            classifier: parts.classifier,
            shared: parts.state,
            signaler: parts.signaler,
            capturer: parts.capturer,
            sink: parts.sink,
            cycle_interval: parts.cycle_interval,
            cooldown: parts.cooldown,
            tracker: StateTracker::new(),
            state: MonitorState::Initializing,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Check every camera is open and move to `Running`; otherwise `Halted`.
    pub fn start(&mut self) -> Result<(), StartError> {
        if let Some(lane) = self.lanes.iter().find(|l| !l.source.is_opened()) {
            self.state = MonitorState::Halted;
            return Err(StartError::CameraUnavailable {
                lane: lane.layout.lane,
                camera_id: lane.layout.camera_id.clone(),
                reason: format!("{} is not open", lane.source.describe()),
            });
        }
        log::info!(
            "monitor running: {} lanes, classifier {}",
            self.lanes.len(),
            self.classifier.name()
        );
        self.state = MonitorState::Running;
        Ok(())
    }

    pub fn run_cycle(&mut self) -> Result<CycleReport, CycleFailure> {
        if self.state != MonitorState::Running {
            return Err(CycleFailure::Fatal(anyhow!(
                "cycle requested in state {:?}",
                self.state
            )));
        }

        let mut fresh: Vec<LaneResult> = Vec::with_capacity(self.lanes.len());
        let mut failed_lanes = Vec::new();
        let (aggregate, counts) = {
            let mut guard = self.shared.lock();
            for lane in &mut self.lanes {
                let manual = guard.override_for(lane.layout.lane);
                match scan_lane(
                    lane.source.as_mut(),
                    &lane.layout,
                    manual,
                    self.classifier.as_mut(),
                ) {
                    Some(result) => {
                        guard.publish_lane(&result);
                        fresh.push(result);
                    }
                    None => failed_lanes.push(lane.layout.lane),
                }
            }
            let aggregate = guard.recompute();
            (aggregate, guard.counts())
        };

        if !failed_lanes.is_empty() && self.lanes.iter().all(|l| !l.source.is_opened()) {
            return Err(CycleFailure::Fatal(anyhow!("every camera has closed")));
        }

        let mut transitions = Vec::new();
        let mut captures = Vec::new();
        for result in &fresh {
            for reading in &result.readings {
                if let Some(event) = self.tracker.observe(reading) {
                    log::info!(
                        "slot {} (lane {}) {} -> {}",
                        event.slot_id,
                        event.lane,
                        event.previous,
                        event.current
                    );
                    captures.push(self.capturer.capture(&event.camera_id, Some(&result.frame)));
                    transitions.push(event);
                }
            }
        }

        let signals = self.signaler.signal(&counts);

        if let Some(sink) = self.sink.as_deref() {
            let overview: Vec<OverviewRecord> = counts
                .iter()
                .zip(&self.lanes)
                .filter_map(|(count, lane)| OverviewRecord::from_count(count, &lane.layout))
                .collect();
            if let Err(err) = sink.upsert_overview(&overview) {
                log::error!("update overview error: {:#}", err);
            }
            let readings: Vec<SlotReading> = fresh
                .iter()
                .flat_map(|r| r.readings.iter().cloned())
                .collect();
            sink.upsert_slot_statuses(&readings)
                .map_err(|err| CycleFailure::Transient(err.context("upsert slot statuses")))?;
        }

        log::debug!(
            "cycle: available {}/{}, {} transitions, {} lanes failed",
            aggregate.available_total,
            aggregate.total_slots,
            transitions.len(),
            failed_lanes.len()
        );

        Ok(CycleReport {
            scanned: fresh.iter().map(|r| r.lane).collect(),
            failed_lanes,
            aggregate,
            transitions,
            captures,
            signals,
        })
    }

    /// Run cycles until `stop` is set or a fatal failure occurs. Returns the
    /// final state.
    pub fn run(&mut self, stop: &AtomicBool) -> MonitorState {
        if self.state == MonitorState::Initializing {
            if let Err(err) = self.start() {
                log::error!("{}", err);
                return self.state;
            }
        }
        while self.state == MonitorState::Running && !stop.load(Ordering::SeqCst) {
            match self.run_cycle() {
                Ok(_) => sleep_unless_stopped(self.cycle_interval, stop),
                Err(CycleFailure::Transient(err)) => {
                    log::error!("worker error: {:#}", err);
                    sleep_unless_stopped(self.cooldown, stop);
                }
                Err(CycleFailure::Fatal(err)) => {
                    log::error!("monitor halted: {:#}", err);
                    self.state = MonitorState::Halted;
                }
            }
        }
        self.state
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}
