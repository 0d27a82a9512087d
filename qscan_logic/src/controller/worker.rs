//! The single consumer of the controller's job queue.

use super::{ControllerSettings, Shared};
use crate::confocal::ConfocalPositioner;
use crate::events::ScanEvent;
use crate::ramp::RampGenerator;
use crate::state::LoopEvent;
use qscan_common::consts::CONFOCAL_TAG;
use qscan_common::hal::driver::HalError;
use qscan_common::hal::types::LinePath;
use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::session::ScanSession;
use qscan_common::scanner::state::ScanState;
use qscan_hal::ScannerInterfuse;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

pub(crate) enum Job {
    /// Next line of run `n`.
    ScanLine(u64),
    /// One cursor loop iteration of generation `n`.
    CursorStep(u64),
    /// Move the scan axis.
    MoveTo(f64),
    /// Move to a restored history position.
    Restore {
        position: Vec<f64>,
        confocal: Option<(f64, f64, f64)>,
    },
    Shutdown,
}

pub(crate) struct LineWorker {
    interfuse: ScannerInterfuse,
    confocal: Option<Box<dyn ConfocalPositioner>>,
    confocal_position: Option<(f64, f64, f64)>,
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    settings: ControllerSettings,
    armed_run: Option<u64>,
}

impl LineWorker {
    pub(crate) fn new(
        interfuse: ScannerInterfuse,
        confocal: Option<Box<dyn ConfocalPositioner>>,
        shared: Arc<Shared>,
        jobs: Sender<Job>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            interfuse,
            confocal,
            confocal_position: None,
            shared,
            jobs,
            settings,
            armed_run: None,
        }
    }

    pub(crate) fn run(mut self, jobs: Receiver<Job>) {
        debug!("Scan worker started");
        while let Ok(job) = jobs.recv() {
            if matches!(job, Job::Shutdown) {
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(job)));
            if let Err(payload) = outcome {
                self.recover(panic_message(payload.as_ref()));
            }
            self.publish_hardware();
        }
        self.finish();
    }

    fn dispatch(&mut self, job: Job) {
        match job {
            Job::ScanLine(run) => self.scan_line(run),
            Job::CursorStep(generation) => self.cursor_step(generation),
            Job::MoveTo(target) => self.move_to(target),
            Job::Restore { position, confocal } => self.restore(&position, confocal),
            Job::Shutdown => {}
        }
    }

    /// Bring the loop back to `Idle` after a job panicked; the worker keeps
    /// serving the queue.
    fn recover(&mut self, message: String) {
        error!("Scan worker job panicked: {}", message);
        self.shared
            .events
            .publish(ScanEvent::HardwareError(format!("scan worker panicked: {message}")));
        if let Err(e) = self.interfuse.close_all_tasks() {
            warn!("Tasks not closed after panic: {}", e);
        }
        self.armed_run = None;
        let (was_active, lines_completed) = {
            let mut status = self.shared.status.lock();
            let was_active = status.machine.state().is_active();
            status.machine.force_idle();
            status.cursor.active = false;
            status.continuable = false;
            (was_active, status.lines_completed)
        };
        self.publish_hardware();
        self.shared.idle.notify_all();
        if was_active {
            self.shared
                .events
                .publish(ScanEvent::ScanFinished { lines_completed });
        }
    }

    // ─── Scan lines ─────────────────────────────────────────────────

    fn scan_line(&mut self, run: u64) {
        let (session, row) = {
            let status = self.shared.status.lock();
            if status.run != run {
                trace!("Line of stale run {} ignored", run);
                return;
            }
            let state = status.machine.state();
            match state {
                ScanState::Idle => return,
                ScanState::StopRequested => {
                    drop(status);
                    self.teardown();
                    return;
                }
                ScanState::Running => (status.session.clone(), status.lines_completed),
            }
        };

        if self.armed_run != Some(run) {
            if let Err(e) = self.arm(&session) {
                error!("Failed to arm scanner: {}", e);
                self.report(&e);
                self.shared.status.lock().machine.handle_event(LoopEvent::Fault);
                self.schedule(run);
                return;
            }
            self.armed_run = Some(run);
        }

        if session.is_xy_plot() {
            self.move_confocal(&session, row);
        }

        match self.acquire(&session) {
            Ok((trace, retrace)) => self.commit(&session, row, trace, retrace),
            Err(e) => self.line_failed(&e),
        }
        self.schedule(run);
    }

    fn arm(&mut self, session: &ScanSession) -> Result<(), ScanError> {
        self.interfuse.reopen_tasks()?;
        self.interfuse.close_clock_task()?;
        self.interfuse
            .create_clock_task(session.clock_frequency, None)?;
        debug!(
            "Scanner armed at {} Hz for axis {}",
            session.clock_frequency, session.scan_axis
        );
        Ok(())
    }

    /// Trace line, then the optional retrace. Only the trace may fail the line.
    fn acquire(
        &mut self,
        session: &ScanSession,
    ) -> Result<(Vec<f64>, Option<Vec<f64>>), ScanError> {
        let generator = RampGenerator::from_session(session);
        let (start, end) = session.scan_range;
        let axis = session.scan_axis;
        let pixel_clock = self.interfuse.config().pixel_clock_channel.is_some();

        self.move_axis_to(axis, start)?;
        let trace_ramp = generator.generate(start, end)?;
        let path = LinePath::from_ramp(axis, trace_ramp.as_slice(), self.interfuse.position())?;
        let counts = self.interfuse.scan_line(&path, pixel_clock);
        if counts.is_failure() {
            return Err(line_error("scan line returned no data".to_string()));
        }
        let trace = counts.into_line();
        if trace.len() != trace_ramp.len() {
            return Err(line_error(format!(
                "{} counts for {} ramp samples",
                trace.len(),
                trace_ramp.len()
            )));
        }

        if !session.retrace {
            return Ok((trace, None));
        }
        let retrace_ramp = generator.generate(end, start)?;
        let path = LinePath::from_ramp(axis, retrace_ramp.as_slice(), self.interfuse.position())?;
        let counts = self.interfuse.scan_line(&path, false);
        if counts.is_failure() {
            warn!("Retrace failed, trace line kept");
            return Ok((trace, None));
        }
        Ok((trace, Some(counts.into_line())))
    }

    fn commit(
        &mut self,
        session: &ScanSession,
        row: usize,
        trace: Vec<f64>,
        retrace: Option<Vec<f64>>,
    ) {
        let lines_completed = {
            let mut status = self.shared.status.lock();
            let mut data = self.shared.data.lock();
            if let Err(e) = data.record_trace(row, trace) {
                drop(data);
                drop(status);
                self.line_failed(&e);
                return;
            }
            if let Some(line) = retrace {
                if let Err(e) = data.record_retrace(row, line) {
                    debug!("Retrace of line {} dropped: {}", row, e);
                }
            }
            drop(data);
            status.lines_completed += 1;
            if status.lines_completed >= session.effective_repeats() {
                status.machine.handle_event(LoopEvent::RepeatsComplete);
            }
            status.lines_completed
        };
        debug!("Line {} committed ({} done)", row, lines_completed);
        self.shared
            .events
            .publish(ScanEvent::ScanDataUpdated { row, lines_completed });
    }

    fn line_failed(&mut self, e: &ScanError) {
        let failed_lines = {
            let mut status = self.shared.status.lock();
            status.failed_lines += 1;
            status.failed_lines
        };
        warn!("Line discarded ({} failed so far): {}", failed_lines, e);
        self.shared
            .events
            .publish(ScanEvent::LineFailed { failed_lines });
        self.report(e);
    }

    fn schedule(&self, run: u64) {
        if self.jobs.send(Job::ScanLine(run)).is_err() {
            error!("Job queue closed, run {} abandoned", run);
        }
    }

    fn teardown(&mut self) {
        if let Err(e) = self.interfuse.close_all_tasks() {
            warn!("Teardown incomplete: {}", e);
            self.report(&e);
        }
        self.armed_run = None;
        let lines_completed = {
            let mut status = self.shared.status.lock();
            status.machine.handle_event(LoopEvent::TeardownComplete);
            let repeats = status.session.effective_repeats();
            status.continuable = status.session.supports_continue()
                && status.lines_completed > 0
                && status.lines_completed < repeats;
            status.lines_completed
        };
        self.publish_hardware();
        self.shared.idle.notify_all();

        info!("Scan finished after {} lines", lines_completed);
        self.shared
            .events
            .publish(ScanEvent::ScanFinished { lines_completed });
    }

    // ─── Positioning ────────────────────────────────────────────────

    fn move_confocal(&mut self, session: &ScanSession, row: usize) {
        let Some(confocal) = self.confocal.as_mut() else {
            return;
        };
        let (x, y) = session.custom_scan_settings.pixel_position(row);
        let z = self
            .confocal_position
            .map_or_else(|| confocal.image_ranges().z.0, |(_, _, z)| z);
        confocal.set_position(CONFOCAL_TAG, x, y, z);
        self.confocal_position = Some((x, y, z));
        trace!("Confocal at pixel {} ({:.3e}, {:.3e})", row, x, y);
    }

    /// Move `axis` to `target` in on-demand writes no larger than the cursor step.
    ///
    /// Takes at most `ceil(|delta| / step) + 1` writes. A step that vanishes
    /// against the current position jumps straight to `target`.
    fn move_axis_to(&mut self, axis: usize, target: f64) -> Result<(), ScanError> {
        self.interfuse.reopen_tasks()?;
        let step = self.settings.cursor_step;
        let current = self.axis_position(axis)?;
        let max_steps = move_steps(target - current, step);
        let mut moved = false;
        for taken in 1..=max_steps {
            let current = self.axis_position(axis)?;
            let delta = target - current;
            if delta == 0.0 {
                break;
            }
            let stepped = current + step * delta.signum();
            let next = if delta.abs() <= step || taken == max_steps || stepped == current {
                target
            } else {
                stepped
            };
            let mut setpoint = vec![None; axis + 1];
            setpoint[axis] = Some(next);
            self.interfuse.set_position(&setpoint)?;
            moved = true;
        }
        if moved {
            self.shared
                .events
                .publish(ScanEvent::PositionChanged(self.interfuse.position().to_vec()));
        }
        Ok(())
    }

    fn axis_position(&self, axis: usize) -> Result<f64, ScanError> {
        self.interfuse
            .position()
            .get(axis)
            .copied()
            .ok_or_else(|| ScanError::Configuration(format!("no axis {axis}")))
    }

    fn move_to(&mut self, target: f64) {
        let axis = self.shared.status.lock().session.scan_axis;
        if let Err(e) = self.move_axis_to(axis, target) {
            warn!("Move of axis {} to {} failed: {}", axis, target, e);
            self.report(&e);
        }
    }

    fn cursor_step(&mut self, generation: u64) {
        let (axis, target) = {
            let status = self.shared.status.lock();
            if !status.cursor.active
                || status.cursor.generation != generation
                || !status.machine.is_idle()
            {
                return;
            }
            (status.session.scan_axis, status.cursor.target)
        };
        if let Err(e) = self.move_axis_to(axis, target) {
            warn!("Cursor loop stopped: {}", e);
            self.report(&e);
            self.shared.status.lock().cursor.active = false;
            return;
        }
        std::thread::sleep(self.settings.cursor_interval);
        if self.jobs.send(Job::CursorStep(generation)).is_err() {
            error!("Job queue closed, cursor loop abandoned");
        }
    }

    fn restore(&mut self, position: &[f64], confocal: Option<(f64, f64, f64)>) {
        let target: Vec<Option<f64>> = position.iter().copied().map(Some).collect();
        let moved = self
            .interfuse
            .reopen_tasks()
            .and_then(|()| self.interfuse.set_position(&target));
        match moved {
            Ok(()) => self
                .shared
                .events
                .publish(ScanEvent::PositionChanged(self.interfuse.position().to_vec())),
            Err(e) => {
                warn!("Restored position not applied: {}", e);
                self.report(&e);
            }
        }
        if let (Some(positioner), Some((x, y, z))) = (self.confocal.as_mut(), confocal) {
            positioner.set_position(CONFOCAL_TAG, x, y, z);
            self.confocal_position = Some((x, y, z));
        }
    }

    // ─── Bookkeeping ────────────────────────────────────────────────

    fn report(&self, e: &ScanError) {
        self.shared
            .events
            .publish(ScanEvent::HardwareError(e.to_string()));
    }

    fn publish_hardware(&self) {
        let mut view = self.shared.hardware.lock();
        view.position.clear();
        view.position.extend_from_slice(self.interfuse.position());
        view.confocal_position = self.confocal_position;
        view.task_states = self.interfuse.task_states();
    }

    fn finish(&mut self) {
        if let Err(e) = self.interfuse.deactivate() {
            warn!("Scanner deactivated with errors: {}", e);
        }
        let was_active = {
            let mut status = self.shared.status.lock();
            let was_active = status.machine.state().is_active();
            status.machine.force_idle();
            status.cursor.active = false;
            was_active
        };
        self.publish_hardware();
        self.shared.idle.notify_all();
        if was_active {
            let lines_completed = self.shared.status.lock().lines_completed;
            self.shared
                .events
                .publish(ScanEvent::ScanFinished { lines_completed });
        }
        debug!("Scan worker stopped");
    }
}

/// Writes needed to cover `delta` in steps of `step`, plus one.
fn move_steps(delta: f64, step: f64) -> usize {
    ((delta.abs() / step).ceil() as usize).saturating_add(1)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn line_error(message: String) -> ScanError {
    ScanError::HardwareIo(HalError::CommunicationError(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_steps_cover_the_distance() {
        assert_eq!(move_steps(0.0, 1.0), 1);
        assert_eq!(move_steps(10.0, 1.0), 11);
        assert_eq!(move_steps(-2.5, 1.0), 4);
        assert_eq!(move_steps(1.0, 1e-320), usize::MAX);
        assert_eq!(move_steps(f64::NAN, 1.0), 1);
    }

    fn payload_of(job: fn()) -> Box<dyn Any + Send> {
        panic::catch_unwind(job).unwrap_err()
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(payload_of(|| panic!("bad {}", 1)).as_ref()), "bad 1");
        assert_eq!(panic_message(payload_of(|| panic!("static")).as_ref()), "static");
    }
}
