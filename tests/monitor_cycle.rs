use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use parking_sentinel::monitor::LaneRuntime;
use parking_sentinel::{
    AdaptiveThresholdBackend, CycleFailure, Frame, FrameSource, HardwareSignaler,
    IncidentCapturer, LaneLayout, MemorySink, Monitor, MonitorParts, MonitorState,
    OccupancyBackend, PersistenceSink, SharedState, SignalLink, SlotRect, SlotStatus,
};

const SLOTS: [SlotRect; 10] = [
    SlotRect::new(100, 80, 30, 60),
    SlotRect::new(160, 80, 30, 60),
    SlotRect::new(230, 80, 30, 60),
    SlotRect::new(310, 80, 30, 60),
    SlotRect::new(380, 80, 30, 60),
    SlotRect::new(100, 150, 30, 60),
    SlotRect::new(160, 150, 30, 60),
    SlotRect::new(230, 150, 30, 60),
    SlotRect::new(310, 150, 30, 60),
    SlotRect::new(380, 150, 30, 60),
];

const ALL: [usize; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

// ----------------------------------------------------------------------------
// Test doubles
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FeedInner {
    queue: VecDeque<Result<Frame, String>>,
    closed: bool,
}

/// Frame source whose reads are scripted from the test body.
#[derive(Clone, Default)]
struct Feed(Arc<Mutex<FeedInner>>);

impl Feed {
    fn push(&self, frame: Frame) {
        self.0.lock().unwrap().queue.push_back(Ok(frame));
    }

    fn fail(&self, reason: &str) {
        self.0.lock().unwrap().queue.push_back(Err(reason.to_string()));
    }

    fn close(&self) {
        self.0.lock().unwrap().closed = true;
    }
}

impl FrameSource for Feed {
    fn describe(&self) -> String {
        "scripted".into()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(anyhow!("camera closed"));
        }
        match inner.queue.pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no frame scripted")),
        }
    }

    fn is_opened(&self) -> bool {
        !self.0.lock().unwrap().closed
    }
}

/// Occupied iff the region is mostly dark.
struct DarkRegion;

impl OccupancyBackend for DarkRegion {
    fn name(&self) -> &'static str {
        "dark_region"
    }

    fn classify(&mut self, region: &RgbImage) -> SlotStatus {
        let n = (region.width() * region.height()).max(1) as u64;
        let sum: u64 = region.pixels().map(|p| p.0[0] as u64).sum();
        SlotStatus::from_occupied(sum / n < 64)
    }
}

#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<String>>>);

impl Wire {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl SignalLink for Wire {
    fn describe(&self) -> String {
        "wire".into()
    }

    fn is_open(&self) -> bool {
        true
    }

    fn write_message(&mut self, message: &str) -> Result<()> {
        self.0.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

struct Harness {
    monitor: Monitor,
    lane1: Feed,
    lane2: Feed,
    state: Arc<SharedState>,
    sink: Arc<MemorySink>,
    wire: Wire,
    dir: TempDir,
}

fn layouts() -> Vec<LaneLayout> {
    ["camA", "camB"]
        .iter()
        .enumerate()
        .map(|(i, camera_id)| LaneLayout {
            lane: (i + 1) as u8,
            camera_id: camera_id.to_string(),
            location_id: 8,
            slots: SLOTS.to_vec(),
            slot_offset: (i * SLOTS.len()) as u32,
        })
        .collect()
}

fn harness_with(classifier: Box<dyn OccupancyBackend>) -> Harness {
    let layouts = layouts();
    let state = Arc::new(SharedState::new(&layouts));
    let sink = Arc::new(MemorySink::new());
    let dir = tempfile::tempdir().unwrap();
    let wire = Wire::default();
    let (lane1, lane2) = (Feed::default(), Feed::default());

    let sink_dyn: Arc<dyn PersistenceSink> = sink.clone();
    let capturer = Arc::new(IncidentCapturer::new(dir.path(), Some(sink_dyn.clone())));
    let lanes = layouts
        .into_iter()
        .zip([lane1.clone(), lane2.clone()])
        .map(|(layout, feed)| LaneRuntime {
            layout,
            source: Box::new(feed),
        })
        .collect();

    let mut monitor = Monitor::new(MonitorParts {
        lanes,
        classifier,
        state: state.clone(),
        signaler: HardwareSignaler::new(Some(Box::new(wire.clone()))),
        capturer,
        sink: Some(sink_dyn),
        cycle_interval: Duration::from_millis(1),
        cooldown: Duration::from_millis(1),
    });
    monitor.start().unwrap();

    Harness {
        monitor,
        lane1,
        lane2,
        state,
        sink,
        wire,
        dir,
    }
}

fn harness() -> Harness {
    harness_with(Box::new(DarkRegion))
}

/// Bright lot with the listed slots painted dark.
fn lot(occupied: &[usize]) -> Frame {
    let mut frame = Frame::filled(640, 480, Rgb([200, 200, 200]));
    for &i in occupied {
        let r = SLOTS[i];
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                frame.image_mut().put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
    }
    frame
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[test]
fn three_of_ten_occupied_reports_lane_not_full() -> Result<()> {
    let mut h = harness();
    h.lane1.push(lot(&[0, 3, 7]));
    h.lane2.push(lot(&[]));

    let report = h.monitor.run_cycle()?;
    assert_eq!(report.scanned, vec![1, 2]);
    assert_eq!(report.aggregate.lanes[0].available, 7);
    assert_eq!(report.aggregate.lanes[1].available, 10);
    assert_eq!(report.aggregate.available_total, 17);
    assert!(report.transitions.is_empty(), "first sight is a baseline");
    assert_eq!(h.wire.take(), vec!["E\n", "L1E\n", "L2E\n"]);

    let overview = h.sink.overview("camA").expect("overview row");
    assert_eq!(overview.occupied, 3);
    assert_eq!(overview.available, 7);
    assert_eq!(overview.status, SlotStatus::Free);
    assert_eq!(overview.location_id, 8);
    assert_eq!(h.sink.slot_rows(), 20);
    assert_eq!(h.sink.slot_status(1), Some(SlotStatus::Occupied));
    assert_eq!(h.sink.slot_status(2), Some(SlotStatus::Free));
    assert_eq!(h.sink.slot_status(11), Some(SlotStatus::Free));

    let json = h.state.snapshot().to_json();
    assert_eq!(json["available_total"], 17);
    assert_eq!(json["available_lane1"], 7);
    Ok(())
}

#[test]
fn all_slots_occupied_signals_full_everywhere() -> Result<()> {
    let mut h = harness();
    h.lane1.push(lot(&ALL));
    h.lane2.push(lot(&ALL));

    let report = h.monitor.run_cycle()?;
    assert_eq!(report.aggregate.available_total, 0);
    assert_eq!(report.signals.delivered, 3);
    assert_eq!(h.wire.take(), vec!["F\n", "L1F\n", "L2F\n"]);
    assert_eq!(
        h.sink.overview("camB").map(|o| o.status),
        Some(SlotStatus::Occupied)
    );
    Ok(())
}

#[test]
fn single_flip_captures_exactly_one_incident() -> Result<()> {
    let mut h = harness();
    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[]));
    h.monitor.run_cycle()?;

    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[4]));
    let report = h.monitor.run_cycle()?;
    assert_eq!(report.transitions.len(), 1);
    let event = &report.transitions[0];
    assert_eq!(event.slot_id, 15);
    assert_eq!(event.lane, 2);
    assert_eq!(event.previous, SlotStatus::Free);
    assert_eq!(event.current, SlotStatus::Occupied);

    assert_eq!(report.captures.len(), 1);
    assert!(report.captures[0].success, "{}", report.captures[0].message);
    let incidents = h.sink.incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].camera_id, "camB");

    let written: Vec<_> = std::fs::read_dir(h.dir.path())?.collect();
    assert_eq!(written.len(), 1);

    // Captured image is the lane's current annotated frame.
    let path = report.captures[0].local_path.clone().expect("local path");
    let captured = Frame::decode(&std::fs::read(path)?)?;
    assert_eq!(captured.dimensions(), (640, 480));

    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[4]));
    let steady = h.monitor.run_cycle()?;
    assert!(steady.transitions.is_empty());
    assert_eq!(h.sink.incidents().len(), 1);
    Ok(())
}

#[test]
fn failed_camera_read_keeps_previous_lane_data() -> Result<()> {
    let mut h = harness();
    h.lane1.push(lot(&[0, 1, 2]));
    h.lane2.push(lot(&[]));
    h.monitor.run_cycle()?;
    let before = h.state.frame(1).expect("lane 1 frame");

    h.lane1.fail("usb glitch");
    h.lane2.push(lot(&[5, 6]));
    let report = h.monitor.run_cycle()?;
    assert_eq!(report.failed_lanes, vec![1]);
    assert_eq!(report.scanned, vec![2]);
    assert_eq!(report.aggregate.lanes[0].available, 7);
    assert_eq!(report.aggregate.lanes[1].available, 8);
    assert_eq!(report.aggregate.available_total, 15);
    assert_eq!(report.transitions.len(), 2);

    let after = h.state.frame(1).expect("lane 1 frame retained");
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(h.sink.overview("camA").map(|o| o.occupied), Some(3));
    assert_eq!(h.monitor.state(), MonitorState::Running);
    Ok(())
}

#[test]
fn occupied_override_forces_lane_until_cleared() -> Result<()> {
    let mut h = harness();
    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[]));
    h.monitor.run_cycle()?;

    h.state.set_override(1, "F")?;
    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[]));
    let forced = h.monitor.run_cycle()?;
    assert_eq!(forced.aggregate.lanes[0].available, 0);
    assert_eq!(forced.aggregate.lanes[1].available, 10);
    assert_eq!(forced.transitions.len(), 10);
    assert!(forced.transitions.iter().all(|t| t.lane == 1));
    h.wire.take();

    h.state.set_override(1, "E")?;
    h.lane1.push(lot(&[2]));
    h.lane2.push(lot(&[]));
    let restored = h.monitor.run_cycle()?;
    assert_eq!(restored.aggregate.lanes[0].available, 9);
    assert_eq!(restored.transitions.len(), 9);
    assert_eq!(h.wire.take(), vec!["E\n", "L1E\n", "L2E\n"]);
    Ok(())
}

#[test]
fn invalid_override_changes_nothing() -> Result<()> {
    let mut h = harness();
    h.state.set_override(2, "F")?;
    assert!(h.state.set_override(2, "maybe").is_err());
    assert_eq!(h.state.override_for(2), Some(SlotStatus::Occupied));

    h.lane1.push(lot(&[]));
    h.lane2.push(lot(&[]));
    let report = h.monitor.run_cycle()?;
    assert_eq!(report.aggregate.lanes[1].available, 0);
    Ok(())
}

#[test]
fn slot_row_failure_is_transient() -> Result<()> {
    let mut h = harness();
    h.sink.fail_slot_writes(true);
    h.lane1.push(lot(&[0]));
    h.lane2.push(lot(&[]));
    match h.monitor.run_cycle() {
        Err(CycleFailure::Transient(_)) => {}
        other => panic!("expected transient failure, got {:?}", other.map(|r| r.scanned)),
    }
    // Status was still published before persistence failed.
    assert_eq!(h.state.snapshot().aggregate.available_total, 19);
    assert!(h.sink.overview("camA").is_some());

    h.sink.fail_slot_writes(false);
    h.lane1.push(lot(&[0]));
    h.lane2.push(lot(&[]));
    h.monitor.run_cycle()?;
    assert_eq!(h.sink.slot_rows(), 20);
    Ok(())
}

#[test]
fn every_camera_closed_is_fatal() {
    let mut h = harness();
    h.lane1.close();
    h.lane2.close();
    assert!(matches!(h.monitor.run_cycle(), Err(CycleFailure::Fatal(_))));

    let stop = AtomicBool::new(false);
    assert_eq!(h.monitor.run(&stop), MonitorState::Halted);
    assert!(matches!(h.monitor.run_cycle(), Err(CycleFailure::Fatal(_))));
}

#[test]
fn closed_camera_at_start_halts() {
    let layouts = layouts();
    let feed = Feed::default();
    feed.close();
    let mut monitor = Monitor::new(MonitorParts {
        lanes: vec![LaneRuntime {
            layout: layouts[0].clone(),
            source: Box::new(feed),
        }],
        classifier: Box::new(DarkRegion),
        state: Arc::new(SharedState::new(&layouts[..1])),
        signaler: HardwareSignaler::disconnected(),
        capturer: Arc::new(IncidentCapturer::new(std::env::temp_dir(), None)),
        sink: None,
        cycle_interval: Duration::from_millis(1),
        cooldown: Duration::from_millis(1),
    });
    assert_eq!(monitor.state(), MonitorState::Initializing);
    assert!(monitor.start().is_err());
    assert_eq!(monitor.state(), MonitorState::Halted);
}

#[test]
fn adaptive_classifier_sees_textured_bays() -> Result<()> {
    let mut h = harness_with(Box::new(AdaptiveThresholdBackend::default()));
    let mut frame = lot(&[]);
    let bay = SLOTS[6];
    for y in bay.y..bay.y + bay.height {
        for x in bay.x..bay.x + bay.width {
            let dark = ((x - bay.x) / 6 + (y - bay.y) / 6) % 2 == 0;
            let v = if dark { 20 } else { 235 };
            frame.image_mut().put_pixel(x, y, Rgb([v, v, v]));
        }
    }
    h.lane1.push(frame);
    h.lane2.push(lot(&[]));

    let report = h.monitor.run_cycle()?;
    assert_eq!(report.aggregate.lanes[0].available, 9);
    assert_eq!(h.sink.slot_status(7), Some(SlotStatus::Occupied));
    assert_eq!(h.sink.slot_status(6), Some(SlotStatus::Free));
    Ok(())
}
