//! Optical bench shared by the simulated card and counter.

use super::SimulationConfig;
use super::tagger::MeasurementBuffer;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Pending injected faults, each consumed by one occurrence.
#[derive(Debug, Default)]
pub(crate) struct SimFaults {
    pub write_failures: u32,
    pub timeouts: u32,
    pub missing_counts: u32,
}

/// Consume one pending fault.
pub(crate) fn take_fault(pending: &mut u32) -> bool {
    if *pending > 0 {
        *pending -= 1;
        true
    } else {
        false
    }
}

pub(crate) struct BenchState {
    pub config: SimulationConfig,
    pub output_voltages: Vec<f64>,
    pub clocked_buffer: Option<Vec<Vec<f64>>>,
    pub last_line: Vec<f64>,
    pub routes: Vec<(String, String)>,
    pub armed: Vec<Weak<Mutex<MeasurementBuffer>>>,
    pub faults: SimFaults,
    pub lines_played: u64,
}

pub(crate) type SharedBench = Arc<Mutex<BenchState>>;

impl BenchState {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            output_voltages: Vec::new(),
            clocked_buffer: None,
            last_line: Vec::new(),
            routes: Vec::new(),
            armed: Vec::new(),
            faults: SimFaults::default(),
            lines_played: 0,
        }
    }

    /// Play the clocked buffer: `clock_samples` edges delimit `clock_samples - 1` pixels.
    pub fn play_line(&mut self, frequency: f64, clock_samples: usize) {
        let pixels = clock_samples.saturating_sub(1);
        let Some(rows) = self.clocked_buffer.take() else {
            trace!("Clock ran without a clocked output buffer");
            return;
        };
        let Some(last_row) = rows.len().checked_sub(1) else {
            return;
        };
        let axis = self.config.signal_axis.unwrap_or(last_row).min(last_row);
        let counts: Vec<f64> = rows[axis]
            .iter()
            .take(pixels)
            .map(|&voltage| (self.config.spectrum.rate_at(voltage) / frequency).round())
            .collect();

        self.output_voltages = rows.iter().filter_map(|row| row.last().copied()).collect();
        self.last_line = rows[axis].clone();
        self.armed.retain(|weak| weak.strong_count() > 0);

        if take_fault(&mut self.faults.missing_counts) {
            trace!("Dropping counts of simulated line");
        } else {
            for buffer in self.armed.iter().filter_map(Weak::upgrade) {
                buffer.lock().record(&counts);
            }
        }
        self.lines_played += 1;
    }
}

/// Test and demo handle onto the simulated bench.
#[derive(Clone)]
pub struct SimulationHandle {
    bench: SharedBench,
}

impl SimulationHandle {
    pub(crate) fn new(bench: SharedBench) -> Self {
        Self { bench }
    }

    /// Fail the next `n` clocked buffer writes.
    pub fn inject_write_failures(&self, n: u32) {
        self.bench.lock().faults.write_failures += n;
    }

    /// Time out the next `n` waits on a finite task.
    pub fn inject_timeouts(&self, n: u32) {
        self.bench.lock().faults.timeouts += n;
    }

    /// Lose the photon counts of the next `n` lines.
    pub fn inject_missing_counts(&self, n: u32) {
        self.bench.lock().faults.missing_counts += n;
    }

    /// Drop every pending fault.
    pub fn clear_faults(&self) {
        self.bench.lock().faults = SimFaults::default();
    }

    /// Clocked lines played so far.
    pub fn lines_played(&self) -> u64 {
        self.bench.lock().lines_played
    }

    /// Voltage currently applied on each analog output.
    pub fn output_voltages(&self) -> Vec<f64> {
        self.bench.lock().output_voltages.clone()
    }

    /// Counter-to-PFI routes currently established.
    pub fn active_routes(&self) -> Vec<(String, String)> {
        self.bench.lock().routes.clone()
    }
}
