//! `ScanLoopController`: start/stop/continue of the scan-line loop.
//!
//! Commands arrive on any thread and only touch the shared status under its
//! lock. Hardware work is queued to a single worker thread which owns the
//! [`ScannerInterfuse`] exclusively:
//!
//! ```text
//! start_scanning ──► status: Idle -> Running, run += 1 ──► Job::ScanLine(run)
//!                                                               │
//!        ┌──────────────────────────────────────────────────────┘
//!        ▼
//!   LineWorker::scan_line(run)
//!     stale run / Idle    -> ignore
//!     StopRequested       -> close all tasks, Idle, ScanFinished
//!     Running             -> trace (+ retrace), commit row, reschedule
//! ```
//!
//! `stop_scanning` only flips the state; the next scheduled line performs
//! the teardown.

pub mod data;
mod worker;

use crate::confocal::ConfocalPositioner;
use crate::events::{EventBus, ScanEvent};
use crate::history::HistoryEntry;
use crate::ramp::RampGenerator;
use crate::state::{LoopEvent, ScanStateMachine};
use parking_lot::{Condvar, Mutex};
use qscan_common::hal::types::{TaskKind, TaskState, ValueRange};
use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::session::ScanSession;
use qscan_common::scanner::state::ScanState;
use qscan_hal::ScannerInterfuse;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use data::ScanData;
use worker::{Job, LineWorker};

/// Cursor loop tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Largest single on-demand move of the scan axis, in position units.
    pub cursor_step: f64,
    /// Pause between cursor loop iterations.
    pub cursor_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cursor_step: 1.0,
            cursor_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CursorStatus {
    pub active: bool,
    pub target: f64,
    pub generation: u64,
}

pub(crate) struct LoopStatus {
    pub machine: ScanStateMachine,
    pub session: ScanSession,
    /// Incremented by every start/continue; lines of older runs are dropped.
    pub run: u64,
    pub lines_completed: usize,
    pub failed_lines: usize,
    pub continuable: bool,
    pub cursor: CursorStatus,
}

/// Last hardware view published by the worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct HardwareView {
    pub position: Vec<f64>,
    pub confocal_position: Option<(f64, f64, f64)>,
    pub task_states: Vec<(TaskKind, TaskState)>,
}

pub(crate) struct Shared {
    pub status: Mutex<LoopStatus>,
    /// Signalled whenever the loop returns to `Idle`.
    pub idle: Condvar,
    pub data: Mutex<ScanData>,
    pub hardware: Mutex<HardwareView>,
    pub events: EventBus,
}

impl Shared {
    fn request_stop(&self) {
        let mut status = self.status.lock();
        if status.machine.state() == ScanState::Running {
            status.machine.handle_event(LoopEvent::Stop);
            info!(
                "Stop requested after {} of {} lines",
                status.lines_completed,
                status.session.effective_repeats()
            );
        }
    }
}

/// Cloneable handle for signal handlers and observer threads.
#[derive(Clone)]
pub struct ScanHandle {
    shared: Arc<Shared>,
}

impl ScanHandle {
    /// Request a cooperative stop; no-op unless running.
    pub fn stop_scanning(&self) {
        self.shared.request_stop();
    }

    pub fn state(&self) -> ScanState {
        self.shared.status.lock().machine.state()
    }

    /// Bounded like [`ScanLoopController::subscribe`].
    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }
}

/// Coordinates scan sessions on one scanner.
pub struct ScanLoopController {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    position_ranges: Vec<ValueRange>,
    has_confocal: bool,
}

impl ScanLoopController {
    /// Activate `interfuse` and start the worker that will own it.
    ///
    /// # Errors
    /// `ScanError::Configuration`/`ScanError::Range` for a session that does
    /// not fit the scanner; any activation error of the interfuse.
    pub fn new(
        mut interfuse: ScannerInterfuse,
        session: ScanSession,
        settings: ControllerSettings,
        confocal: Option<Box<dyn ConfocalPositioner>>,
    ) -> Result<Self, ScanError> {
        if !(settings.cursor_step.is_finite() && settings.cursor_step > 0.0) {
            return Err(ScanError::Configuration(format!(
                "cursor step must be positive, got {}",
                settings.cursor_step
            )));
        }
        let position_ranges = interfuse.position_ranges().to_vec();
        let line_length = prepare(&session, &position_ranges)?;
        interfuse.activate()?;

        let hardware = HardwareView {
            position: interfuse.position().to_vec(),
            confocal_position: None,
            task_states: interfuse.task_states(),
        };
        let cursor_target = hardware
            .position
            .get(session.scan_axis)
            .copied()
            .unwrap_or_default();
        let data = ScanData::new(session.effective_repeats(), line_length);
        let has_confocal = confocal.is_some();
        let shared = Arc::new(Shared {
            status: Mutex::new(LoopStatus {
                machine: ScanStateMachine::new(),
                session,
                run: 0,
                lines_completed: 0,
                failed_lines: 0,
                continuable: false,
                cursor: CursorStatus {
                    target: cursor_target,
                    ..CursorStatus::default()
                },
            }),
            idle: Condvar::new(),
            data: Mutex::new(data),
            hardware: Mutex::new(hardware),
            events: EventBus::new(),
        });

        let (tx, rx) = mpsc::channel();
        let worker = LineWorker::new(interfuse, confocal, Arc::clone(&shared), tx.clone(), settings);
        let handle = std::thread::Builder::new()
            .name("qscan-scan-loop".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| ScanError::Configuration(format!("failed to spawn scan worker: {e}")))?;

        info!("Scan loop controller ready (line length {})", line_length);
        Ok(Self {
            shared,
            jobs: tx,
            worker: Some(handle),
            position_ranges,
            has_confocal,
        })
    }

    // ─── Observation ────────────────────────────────────────────────

    /// New receiver for the events from now on; see [`EventBus::subscribe`]
    /// for its bound.
    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> ScanState {
        self.shared.status.lock().machine.state()
    }

    /// Copy of the current session.
    pub fn session(&self) -> ScanSession {
        self.shared.status.lock().session.clone()
    }

    pub fn lines_completed(&self) -> usize {
        self.shared.status.lock().lines_completed
    }

    pub fn failed_lines(&self) -> usize {
        self.shared.status.lock().failed_lines
    }

    pub fn is_continuable(&self) -> bool {
        self.shared.status.lock().continuable
    }

    /// Copy of the scan buffers.
    pub fn data(&self) -> ScanData {
        self.shared.data.lock().clone()
    }

    /// Task states as last reported by the worker.
    pub fn task_states(&self) -> Vec<(TaskKind, TaskState)> {
        self.shared.hardware.lock().task_states.clone()
    }

    /// Scanner position as last reported by the worker.
    pub fn position(&self) -> Vec<f64> {
        self.shared.hardware.lock().position.clone()
    }

    /// Block until the loop is idle or `timeout` elapses. True if idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        while !status.machine.is_idle() {
            if self.shared.idle.wait_until(&mut status, deadline).timed_out() {
                return status.machine.is_idle();
            }
        }
        true
    }

    // ─── Settings ───────────────────────────────────────────────────

    /// Replace the session and reinitialize the buffers for it.
    pub fn configure(&self, session: ScanSession) -> Result<(), ScanError> {
        let clock_changed = {
            let mut status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::NotIdle);
            }
            let line_length = prepare(&session, &self.position_ranges)?;
            let clock_changed = status.session.clock_frequency != session.clock_frequency;
            *self.shared.data.lock() = ScanData::new(session.effective_repeats(), line_length);
            status.session = session;
            status.lines_completed = 0;
            status.failed_lines = 0;
            status.continuable = false;
            clock_changed.then_some(status.session.clock_frequency)
        };
        self.shared.events.publish(ScanEvent::SettingsUpdated);
        if let Some(frequency) = clock_changed {
            self.shared
                .events
                .publish(ScanEvent::ClockFrequencyChanged(frequency));
        }
        Ok(())
    }

    /// Zero the buffers to the shape `session` produces, keeping the current
    /// session. Used before restoring a history entry of that shape.
    pub fn initialize_data(&self, session: &ScanSession) -> Result<(), ScanError> {
        let status = self.shared.status.lock();
        if !status.machine.is_idle() {
            return Err(ScanError::NotIdle);
        }
        let line_length = prepare(session, &self.position_ranges)?;
        *self.shared.data.lock() = ScanData::new(session.effective_repeats(), line_length);
        debug!(
            "Scan buffers reinitialized to {}x{}",
            session.effective_repeats(),
            line_length
        );
        Ok(())
    }

    /// Set the ramp end points; the clock follows range, speed and resolution.
    pub fn set_scan_range(&self, start: f64, end: f64) -> Result<(), ScanError> {
        self.update_session(|session| session.scan_range = (start, end))
    }

    /// Set the ramp speed (clipped); the clock follows.
    pub fn set_scan_speed(&self, speed: f64) -> Result<(), ScanError> {
        self.update_session(|session| session.set_scan_speed(speed))
    }

    /// Set the samples per line; the clock follows.
    pub fn set_resolution(&self, resolution: usize) -> Result<(), ScanError> {
        self.update_session(|session| session.resolution = resolution)
    }

    /// Set the repeat count (clipped).
    pub fn set_number_of_repeats(&self, repeats: usize) -> Result<(), ScanError> {
        self.update_session(|session| session.set_number_of_repeats(repeats))
    }

    fn update_session(&self, change: impl FnOnce(&mut ScanSession)) -> Result<(), ScanError> {
        let mut session = self.session();
        change(&mut session);
        session.update_clock_frequency();
        self.configure(session)
    }

    // ─── Scan loop ──────────────────────────────────────────────────

    /// Start a fresh scan with the current session.
    ///
    /// # Errors
    /// `ScanError::AlreadyRunning` unless idle; configuration and range
    /// errors of the session.
    pub fn start_scanning(&self) -> Result<(), ScanError> {
        let (run, repeats, line_length) = {
            let mut status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::AlreadyRunning);
            }
            let line_length = prepare(&status.session, &self.position_ranges)?;
            if status.session.is_xy_plot() && !self.has_confocal {
                return Err(ScanError::Configuration(
                    "custom XY scan needs a confocal positioner".to_string(),
                ));
            }
            let repeats = status.session.effective_repeats();
            *self.shared.data.lock() = ScanData::new(repeats, line_length);
            status.lines_completed = 0;
            status.failed_lines = 0;
            status.continuable = false;
            status.cursor.active = false;
            status.run += 1;
            status.machine.handle_event(LoopEvent::Start);
            (status.run, repeats, line_length)
        };
        self.enqueue_line(run)?;

        info!("Scan started: {} lines of {} samples", repeats, line_length);
        self.shared.events.publish(ScanEvent::ScanStarted {
            resumed: false,
            repeats,
            line_length,
        });
        Ok(())
    }

    /// Request a stop; the next scheduled line tears down. No-op unless running.
    pub fn stop_scanning(&self) {
        self.shared.request_stop();
    }

    /// Resume a stopped scan without clearing its buffers.
    ///
    /// # Errors
    /// `ScanError::AlreadyRunning` unless idle, `ScanError::NotContinuable`
    /// when there is nothing to resume.
    pub fn continue_scanning(&self) -> Result<(), ScanError> {
        let (run, repeats, line_length) = {
            let mut status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::AlreadyRunning);
            }
            let repeats = status.session.effective_repeats();
            if !status.continuable {
                return Err(ScanError::NotContinuable(
                    "no interrupted scan to resume".to_string(),
                ));
            }
            if status.lines_completed >= repeats {
                return Err(ScanError::NotContinuable(format!(
                    "all {repeats} lines already acquired"
                )));
            }
            let line_length = self.shared.data.lock().shape().1;
            status.cursor.active = false;
            status.run += 1;
            status.machine.handle_event(LoopEvent::Continue);
            (status.run, repeats, line_length)
        };
        self.enqueue_line(run)?;

        info!("Scan continued at line {}", self.lines_completed());
        self.shared.events.publish(ScanEvent::ScanStarted {
            resumed: true,
            repeats,
            line_length,
        });
        Ok(())
    }

    fn enqueue_line(&self, run: u64) -> Result<(), ScanError> {
        if self.jobs.send(Job::ScanLine(run)).is_err() {
            error!("Scan worker gone, cannot schedule run {}", run);
            self.shared.status.lock().machine.force_idle();
            return Err(ScanError::QueueClosed);
        }
        Ok(())
    }

    // ─── Cursor ─────────────────────────────────────────────────────

    /// Set where the cursor loop drives the scan axis.
    pub fn set_cursor_position(&self, position: f64) -> Result<(), ScanError> {
        let mut status = self.shared.status.lock();
        check_position(&self.position_ranges, status.session.scan_axis, position)?;
        status.cursor.target = position;
        Ok(())
    }

    pub fn cursor_position(&self) -> f64 {
        self.shared.status.lock().cursor.target
    }

    /// Keep moving the scan axis to the cursor until stopped or a scan starts.
    pub fn start_cursor_loop(&self) -> Result<(), ScanError> {
        let generation = {
            let mut status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::NotIdle);
            }
            if status.cursor.active {
                return Ok(());
            }
            status.cursor.active = true;
            status.cursor.generation += 1;
            status.cursor.generation
        };
        debug!("Cursor loop started");
        self.send(Job::CursorStep(generation))
    }

    pub fn stop_cursor_loop(&self) {
        self.shared.status.lock().cursor.active = false;
        debug!("Cursor loop stopped");
    }

    pub fn is_cursor_loop_active(&self) -> bool {
        self.shared.status.lock().cursor.active
    }

    /// Move the scan axis stepwise to `position`.
    pub fn move_to_position(&self, position: f64) -> Result<(), ScanError> {
        {
            let status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::NotIdle);
            }
            check_position(&self.position_ranges, status.session.scan_axis, position)?;
        }
        self.send(Job::MoveTo(position))
    }

    // ─── History ────────────────────────────────────────────────────

    /// Deep copy of the live state.
    pub fn snapshot(&self) -> HistoryEntry {
        let (session, data, lines_completed, continuable, cursor_position) = {
            let status = self.shared.status.lock();
            let data = self.shared.data.lock().clone();
            (
                status.session.clone(),
                data,
                status.lines_completed,
                status.continuable,
                status.cursor.target,
            )
        };
        let hardware = self.shared.hardware.lock().clone();
        HistoryEntry {
            session,
            data,
            position: hardware.position,
            confocal_position: hardware.confocal_position,
            cursor_position,
            lines_completed,
            continuable,
        }
    }

    /// Load `entry` into the live state and move the hardware to its position.
    ///
    /// # Errors
    /// `ScanError::NotIdle` unless idle; `ScanError::Restore` if the stored
    /// matrix shape differs from the live one or the session does not fit
    /// this scanner.
    pub fn restore(&self, entry: &HistoryEntry) -> Result<(), ScanError> {
        {
            let mut status = self.shared.status.lock();
            if !status.machine.is_idle() {
                return Err(ScanError::NotIdle);
            }
            prepare(&entry.session, &self.position_ranges)
                .map_err(|e| ScanError::Restore(format!("stored session rejected: {e}")))?;
            let mut data = self.shared.data.lock();
            if data.shape() != entry.data.shape() {
                let (rows, columns) = entry.data.shape();
                let (live_rows, live_columns) = data.shape();
                warn!(
                    "History entry of {}x{} skipped, live buffers are {}x{}",
                    rows, columns, live_rows, live_columns
                );
                return Err(ScanError::Restore(format!(
                    "stored matrix is {rows}x{columns}, live matrix is {live_rows}x{live_columns}"
                )));
            }
            *data = entry.data.clone();
            status.session = entry.session.clone();
            status.lines_completed = entry.lines_completed;
            status.failed_lines = 0;
            status.continuable = entry.continuable;
            status.cursor.target = entry.cursor_position;
        }
        self.send(Job::Restore {
            position: entry.position.clone(),
            confocal: entry.confocal_position,
        })?;

        self.shared.events.publish(ScanEvent::SettingsUpdated);
        self.shared.events.publish(ScanEvent::HistoryEvent);
        Ok(())
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    /// Stop any scan, close the hardware and join the worker. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.request_stop();
        self.stop_cursor_loop();
        if self.jobs.send(Job::Shutdown).is_err() {
            warn!("Scan worker already gone");
        }
        if worker.join().is_err() {
            error!("Scan worker panicked");
        }
        info!("Scan loop controller shut down");
    }

    fn send(&self, job: Job) -> Result<(), ScanError> {
        self.jobs.send(job).map_err(|_| ScanError::QueueClosed)
    }
}

impl Drop for ScanLoopController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Validate `session` against the scanner; returns the trace length.
fn prepare(session: &ScanSession, ranges: &[ValueRange]) -> Result<usize, ScanError> {
    session.validate()?;
    if session.scan_axis >= ranges.len() {
        return Err(ScanError::Configuration(format!(
            "scan axis {} but scanner has {} axes",
            session.scan_axis,
            ranges.len()
        )));
    }
    let (start, end) = session.scan_range;
    check_position(ranges, session.scan_axis, start)?;
    check_position(ranges, session.scan_axis, end)?;
    let trace = RampGenerator::from_session(session).generate(start, end)?;
    Ok(trace.len())
}

fn check_position(ranges: &[ValueRange], axis: usize, position: f64) -> Result<(), ScanError> {
    let range = ranges
        .get(axis)
        .ok_or_else(|| ScanError::Configuration(format!("no axis {axis}")))?;
    if !(position >= range.min && position <= range.max) {
        return Err(ScanError::Range {
            quantity: "position",
            axis,
            value: position,
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}
