//! Whole scans on the simulated bench.

use super::{TIMEOUT, controller, session, wait_event};
use qscan_common::hal::types::TaskState;
use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::state::ScanState;
use qscan_logic::RampGenerator;
use qscan_logic::events::ScanEvent;

#[test]
fn scan_finds_the_spectral_line() {
    let (controller, handle) = controller(session(4), None);
    let events = controller.subscribe();
    controller.start_scanning().unwrap();
    assert!(wait_event(&events, |e| matches!(e, ScanEvent::ScanFinished { .. })));
    assert!(controller.wait_until_idle(TIMEOUT));

    let data = controller.data();
    assert_eq!(data.rows_written(), 4);
    assert_eq!(handle.lines_played(), 8);

    // every line sees the same deterministic spectrum
    let rows = data.trace_matrix();
    assert!(rows.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(data.mean(), rows[0].as_slice());

    let (sample, rate) = data.peak().unwrap();
    let ramp = RampGenerator::from_session(&controller.session())
        .generate(20.0, 80.0)
        .unwrap();
    assert!((ramp.as_slice()[sample] - 50.0).abs() < 2.0);
    assert!(rate > 10_000.0);
    assert!(rows[0][0] < 3_000.0);

    // retrace lines are kept apart from the mean, mirrored
    let retrace = data.last_retrace();
    assert_eq!(retrace.len(), rows[0].len());
    let retrace_peak = retrace
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert!(retrace_peak.abs_diff(rows[0].len() - 1 - sample) <= 1);
}

#[test]
fn faults_are_skipped_and_the_scan_completes() {
    let (controller, handle) = controller(session(5), None);
    handle.inject_timeouts(1);
    handle.inject_missing_counts(1);
    controller.start_scanning().unwrap();
    assert!(controller.wait_until_idle(TIMEOUT));

    assert_eq!(controller.lines_completed(), 5);
    assert!(controller.failed_lines() >= 1);
    let data = controller.data();
    assert_eq!(data.rows_written(), 5);
    assert!(
        data.trace_matrix()
            .iter()
            .all(|row| row.iter().all(|&c| c >= 0.0))
    );
    assert!(handle.active_routes().is_empty());
}

#[test]
fn interrupted_scan_continues_to_completion() {
    let (controller, _) = controller(session(30), None);
    let events = controller.subscribe();
    controller.start_scanning().unwrap();
    assert!(wait_event(&events, |e| matches!(
        e,
        ScanEvent::ScanDataUpdated { .. }
    )));
    controller.stop_scanning();
    assert!(controller.wait_until_idle(TIMEOUT));

    let stopped_at = controller.lines_completed();
    if stopped_at == 30 {
        // scan outran the stop request
        assert!(!controller.is_continuable());
        return;
    }
    assert!(controller.is_continuable());
    assert!(
        controller
            .task_states()
            .iter()
            .all(|(_, state)| *state == TaskState::Closed)
    );

    controller.continue_scanning().unwrap();
    assert!(wait_event(&events, |e| matches!(
        e,
        ScanEvent::ScanFinished { lines_completed: 30 }
    )));
    assert!(controller.wait_until_idle(TIMEOUT));
    assert_eq!(controller.data().rows_written(), 30);
    assert!(!controller.is_continuable());
    assert!(matches!(
        controller.continue_scanning(),
        Err(ScanError::NotContinuable(_))
    ));
}

#[test]
fn settings_change_between_scans() {
    let (controller, _) = controller(session(2), None);
    controller.start_scanning().unwrap();
    assert!(controller.wait_until_idle(TIMEOUT));

    let events = controller.subscribe();
    controller.set_resolution(30).unwrap();
    // 30 samples over 60 units at 600 units/s
    assert!((controller.session().clock_frequency - 300.0).abs() < 1e-9);
    assert!(wait_event(&events, |e| matches!(
        e,
        ScanEvent::ClockFrequencyChanged(f) if (f - 300.0).abs() < 1e-9
    )));
    assert_eq!(controller.data().shape(), (2, 30));
    assert!(controller.data().is_empty());

    controller.start_scanning().unwrap();
    assert!(controller.wait_until_idle(TIMEOUT));
    assert_eq!(controller.state(), ScanState::Idle);
    assert_eq!(controller.data().rows_written(), 2);
    assert_eq!(controller.data().trace_matrix()[1].len(), 30);
}

#[test]
fn cursor_loop_parks_the_axis() {
    let (controller, handle) = controller(session(1), None);
    controller.set_cursor_position(75.0).unwrap();
    controller.start_cursor_loop().unwrap();

    let mut parked = false;
    for _ in 0..2000 {
        if controller.position().get(1) == Some(&75.0) {
            parked = true;
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(parked);
    controller.stop_cursor_loop();
    assert!(!controller.is_cursor_loop_active());
    // 75 on 0..100 is 5 V on ±10 V
    assert!((handle.output_voltages()[1] - 5.0).abs() < 1e-9);
}
