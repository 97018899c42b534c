//! parkingd - parking slot occupancy daemon
//!
//! This daemon:
//! 1. Loads the slot map and collaborators from file + environment config
//! 2. Serves the status API (availability, annotated frames, manual overrides)
//! 3. Runs the monitoring loop on a dedicated thread: scan lanes, track slot
//!    transitions, capture incidents, signal the controller, persist rows
//! 4. Stops on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_sentinel::{
    api::{ApiContext, ApiServer},
    config::ParkingdConfig,
    monitor::acquire_cameras,
    signal::connect_controller,
    sink::open_sink,
    AdaptiveThresholdBackend, HardwareSignaler, IncidentCapturer, Monitor, MonitorParts,
    MonitorState, PersistenceSink, SharedState,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ParkingdConfig::load()?;
    log::info!(
        "parkingd {}: {} lanes, {} slots, threshold {}",
        env!("CARGO_PKG_VERSION"),
        config.lanes.len(),
        config.total_slots(),
        config.occupancy_threshold
    );

    let state = Arc::new(SharedState::new(&config.lane_layouts()));
    let sink = open_sink(&config.sink);
    let capturer = Arc::new(IncidentCapturer::new(
        config.incident_dir.clone(),
        sink.clone(),
    ));

    let api_handle = ApiServer::new(
        config.api_addr.clone(),
        ApiContext {
            state: state.clone(),
            capturer: capturer.clone(),
        },
    )
    .spawn()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_monitor = stop.clone();
    let monitor_join = std::thread::Builder::new()
        .name("monitor".into())
        .spawn(move || run_monitor(config, state, capturer, sink, &stop_monitor))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("parkingd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping monitor and API server...");
    stop.store(true, Ordering::SeqCst);
    let final_state = monitor_join
        .join()
        .map_err(|_| anyhow!("monitor thread panicked"))?;
    log::info!("monitor finished in state {:?}", final_state);
    api_handle.stop()?;

    Ok(())
}

fn run_monitor(
    config: ParkingdConfig,
    state: Arc<SharedState>,
    capturer: Arc<IncidentCapturer>,
    sink: Option<Arc<dyn PersistenceSink>>,
    stop: &AtomicBool,
) -> MonitorState {
    let signaler = HardwareSignaler::new(connect_controller(&config.serial));

    let lanes = match acquire_cameras(&config) {
        Ok(lanes) => lanes,
        Err(err) => {
            log::error!("{}; monitor will not start", err);
            return MonitorState::Halted;
        }
    };

    let mut monitor = Monitor::new(MonitorParts {
        lanes,
        classifier: Box::new(AdaptiveThresholdBackend::new(config.occupancy_threshold)),
        state,
        signaler,
        capturer,
        sink,
        cycle_interval: config.cycle_interval,
        cooldown: config.cooldown,
    });
    monitor.run(stop)
}
