//! History snapshots saved by one controller and restored into another.

use super::{TIMEOUT, controller, session};
use parking_lot::Mutex;
use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::session::{CustomScanSettings, ScanSession};
use qscan_logic::confocal::{ConfocalPositioner, ImageRanges};
use qscan_logic::events::ScanEvent;
use qscan_logic::{HistoryManager, HistoryStore};
use std::sync::Arc;
use tempfile::tempdir;

type Moves = Arc<Mutex<Vec<(f64, f64, f64)>>>;

struct RecordingConfocal(Moves);

impl ConfocalPositioner for RecordingConfocal {
    fn set_position(&mut self, _tag: &str, x: f64, y: f64, z: f64) {
        self.0.lock().push((x, y, z));
    }

    fn image_ranges(&self) -> ImageRanges {
        ImageRanges::default()
    }
}

fn xy_session() -> ScanSession {
    ScanSession {
        custom_scan: true,
        custom_scan_settings: CustomScanSettings {
            x_range: (0.0, 2e-6),
            y_range: (0.0, 1e-6),
            order_1_resolution: 3,
            order_2_resolution: 2,
        },
        ..session(1)
    }
}

#[test]
fn history_survives_a_restart() {
    let dir = tempdir().unwrap();
    let store = HistoryStore::new(dir.path().join("history.bin"));

    let saved = {
        let (controller, _) = controller(session(3), None);
        controller.set_cursor_position(33.0).unwrap();
        controller.start_scanning().unwrap();
        assert!(controller.wait_until_idle(TIMEOUT));

        let mut history = HistoryManager::new(4);
        history.record(&controller);
        history.save(&store).unwrap();
        history.latest().unwrap().clone()
    };
    assert_eq!(saved.lines_completed, 3);
    assert_eq!(saved.cursor_position, 33.0);

    let (controller, _) = controller(session(3), None);
    let history = HistoryManager::load(&store, 4).unwrap();
    assert_eq!(history.len(), 1);
    let entry = history.latest().unwrap();
    assert_eq!(entry, &saved);

    let events = controller.subscribe();
    HistoryManager::restore(entry, &controller).unwrap();
    assert_eq!(controller.data(), saved.data);
    assert_eq!(controller.lines_completed(), 3);
    assert_eq!(controller.cursor_position(), 33.0);
    assert!(super::wait_event(&events, |e| *e == ScanEvent::HistoryEvent));
}

#[test]
fn restore_needs_matching_buffers() {
    let (first, _) = controller(session(2), None);
    first.start_scanning().unwrap();
    assert!(first.wait_until_idle(TIMEOUT));
    let entry = HistoryManager::snapshot(&first);

    let (second, _) = controller(session(5), None);
    let before = second.data();
    assert!(matches!(
        HistoryManager::restore(&entry, &second),
        Err(ScanError::Restore(_))
    ));
    assert_eq!(second.data(), before);

    second.initialize_data(&entry.session).unwrap();
    HistoryManager::restore(&entry, &second).unwrap();
    assert_eq!(second.data(), entry.data);
    assert_eq!(second.session(), entry.session);
}

#[test]
fn navigating_back_drops_newer_entries() {
    let (controller, _) = controller(session(2), None);
    let mut history = HistoryManager::new(10);
    for resolution in [40, 50, 60] {
        controller.set_resolution(resolution).unwrap();
        controller.start_scanning().unwrap();
        assert!(controller.wait_until_idle(TIMEOUT));
        history.record(&controller);
    }
    assert_eq!(history.len(), 3);

    // restore only checks the live shape, so reshape first
    let target = history.get(1).unwrap().clone();
    controller.initialize_data(&target.session).unwrap();
    history.go_back(1, &controller).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(controller.session().resolution, 50);
    assert_eq!(controller.data(), target.data);

    assert!(matches!(
        history.go_back(7, &controller),
        Err(ScanError::Restore(_))
    ));
    assert_eq!(history.len(), 2);
}

#[test]
fn restored_xy_scan_moves_the_confocal_back() {
    let dir = tempdir().unwrap();
    let store = HistoryStore::new(dir.path().join("xy.bin"));

    let moves: Moves = Arc::default();
    let (controller_a, _) = controller(
        xy_session(),
        Some(Box::new(RecordingConfocal(Arc::clone(&moves)))),
    );
    controller_a.start_scanning().unwrap();
    assert!(controller_a.wait_until_idle(TIMEOUT));
    assert_eq!(controller_a.lines_completed(), 6);
    assert_eq!(moves.lock().len(), 6);

    let mut history = HistoryManager::new(2);
    history.record(&controller_a);
    history.save(&store).unwrap();
    let last_pixel = history.latest().unwrap().confocal_position;
    assert_eq!(last_pixel, Some((2e-6, 1e-6, 0.0)));
    drop(controller_a);

    let restored_moves: Moves = Arc::default();
    let (controller_b, _) = controller(
        xy_session(),
        Some(Box::new(RecordingConfocal(Arc::clone(&restored_moves)))),
    );
    let history = HistoryManager::load(&store, 2).unwrap();
    HistoryManager::restore(history.latest().unwrap(), &controller_b).unwrap();

    let mut forwarded = false;
    for _ in 0..2000 {
        if restored_moves.lock().last().copied() == last_pixel {
            forwarded = true;
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(forwarded);
    assert!(!controller_b.is_continuable());
}

#[test]
fn resuming_keeps_buffers_only_for_the_same_session() {
    let (first, _) = controller(session(30), None);
    let events = first.subscribe();
    first.start_scanning().unwrap();
    assert!(super::wait_event(&events, |e| matches!(
        e,
        ScanEvent::ScanDataUpdated { .. }
    )));
    first.stop_scanning();
    assert!(first.wait_until_idle(TIMEOUT));
    let mut history = HistoryManager::new(2);
    history.record(&first);
    let stored = history.latest().unwrap().clone();
    assert!(stored.lines_completed > 0);

    let (same, _) = controller(session(30), None);
    let continuable = history.resume_latest(&same, session(30)).unwrap();
    assert_eq!(same.data(), stored.data);
    assert_eq!(same.lines_completed(), stored.lines_completed);
    assert_eq!(continuable, stored.continuable);

    let (changed, _) = controller(session(5), None);
    assert!(!history.resume_latest(&changed, session(5)).unwrap());
    assert_eq!(changed.session(), session(5));
    assert!(changed.data().is_empty());
    assert_eq!(changed.data().shape().0, 5);
    assert_eq!(changed.lines_completed(), 0);

    let empty = HistoryManager::new(2);
    assert!(!empty.resume_latest(&changed, session(4)).unwrap());
    assert_eq!(changed.session(), session(4));
}
