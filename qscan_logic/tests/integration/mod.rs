//! Shared fixtures for the integration tests.

mod config_loading;
mod history_persistence;
mod scan_loop;

use qscan_common::hal::config::{ScannerConfig, TaggerConfig};
use qscan_common::hal::types::ValueRange;
use qscan_common::scanner::session::ScanSession;
use qscan_hal::ScannerInterfuse;
use qscan_hal::drivers::simulation::{self, SimulationConfig, SimulationHandle};
use qscan_logic::confocal::ConfocalPositioner;
use qscan_logic::events::ScanEvent;
use qscan_logic::{ControllerSettings, ScanLoopController};
use std::sync::mpsc::Receiver;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Two axes over 0..100 on ±10 V; the spectral line sits at 0 V, position 50.
pub fn scanner_config() -> ScannerConfig {
    ScannerConfig {
        read_write_timeout_s: 10.0,
        ao_channels: vec!["/Dev1/AO0".into(), "/Dev1/AO1".into()],
        voltage_ranges: vec![ValueRange::new(-10.0, 10.0), ValueRange::new(-10.0, 10.0)],
        position_ranges: vec![ValueRange::new(0.0, 100.0), ValueRange::new(0.0, 100.0)],
        clock_channel: "/Dev1/Ctr2".into(),
        clock_frequency: 1000.0,
        pixel_clock_channel: Some("/Dev1/PFI6".into()),
        ai_channels: vec![],
        ai_voltage_ranges: vec![],
    }
}

pub fn tagger_config() -> TaggerConfig {
    TaggerConfig {
        detector_channels: vec!["one".into(), "two".into()],
        marker_channel: "eight".into(),
    }
}

pub fn session(repeats: usize) -> ScanSession {
    ScanSession {
        scan_axis: 1,
        scan_range: (20.0, 80.0),
        resolution: 60,
        scan_speed: 600.0,
        clock_frequency: 600.0,
        number_of_repeats: repeats,
        smoothing_steps: 3,
        ..Default::default()
    }
}

pub fn controller(
    session: ScanSession,
    confocal: Option<Box<dyn ConfocalPositioner>>,
) -> (ScanLoopController, SimulationHandle) {
    let (backend, handle) = simulation::create(SimulationConfig::default());
    let interfuse = ScannerInterfuse::new(scanner_config(), tagger_config(), backend).unwrap();
    let settings = ControllerSettings {
        cursor_step: 10.0,
        cursor_interval: Duration::from_millis(1),
    };
    let controller = ScanLoopController::new(interfuse, session, settings, confocal).unwrap();
    (controller, handle)
}

/// Drain `events` until one matches; false on timeout.
pub fn wait_event(events: &Receiver<ScanEvent>, matches: impl Fn(&ScanEvent) -> bool) -> bool {
    while let Ok(event) = events.recv_timeout(TIMEOUT) {
        if matches(&event) {
            return true;
        }
    }
    false
}
