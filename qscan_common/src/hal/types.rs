//! Value types exchanged with the hardware collaborators.

use crate::consts::{FAILED_LINE_SENTINEL, VOLTAGE_EPSILON};
use crate::scanner::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Ranges ─────────────────────────────────────────────────────────

/// Closed interval `[min, max]`, written as a two-element array in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ValueRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ValueRange {
    /// Create a range. Ordering is not checked, see [`ValueRange::is_valid`].
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `max - min`.
    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Finite bounds with `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Containment with [`VOLTAGE_EPSILON`] slack on both ends.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min - VOLTAGE_EPSILON && value <= self.max + VOLTAGE_EPSILON
    }
}

impl From<[f64; 2]> for ValueRange {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<ValueRange> for [f64; 2] {
    fn from(value: ValueRange) -> Self {
        [value.min, value.max]
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// ─── Tasks ──────────────────────────────────────────────────────────

/// Opaque handle to a task owned by a [`DaqDevice`](crate::hal::driver::DaqDevice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub u32);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// The four task kinds an interfuse instance may hold, at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Counter-output pulse train driving the pixel clock.
    Clock,
    /// Analog output driving the scan axes.
    AnalogOutput,
    /// Analog input sampled alongside the ramp.
    AnalogInput,
    /// Photon counter gated by the marker channel.
    Counter,
}

impl TaskKind {
    /// All kinds in start order of a scan line (output first, clock last).
    pub const ALL: [TaskKind; 4] = [
        TaskKind::AnalogOutput,
        TaskKind::AnalogInput,
        TaskKind::Counter,
        TaskKind::Clock,
    ];

    /// Stable slot index.
    pub const fn index(self) -> usize {
        match self {
            Self::Clock => 0,
            Self::AnalogOutput => 1,
            Self::AnalogInput => 2,
            Self::Counter => 3,
        }
    }

    /// Short name used in task names and log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clock => "clock",
            Self::AnalogOutput => "analog-output",
            Self::AnalogInput => "analog-input",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle: `Closed -> Created -> Configured -> Running -> Stopped -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskState {
    /// No task of this kind exists.
    #[default]
    Closed,
    /// Task exists, timing not configured.
    Created,
    /// Timing (rate, sample mode) configured.
    Configured,
    /// Task started.
    Running,
    /// Task stopped, may be reconfigured or closed.
    Stopped,
}

/// Sample mode of a timed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleMode {
    /// Generate/acquire a fixed number of samples.
    Finite,
    /// Run until stopped.
    Continuous,
}

/// Timing source of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingType {
    /// Software-timed, one sample per write.
    OnDemand,
    /// Clocked by an external sample clock.
    SampleClock,
    /// Counter implicit timing.
    Implicit,
}

// ─── Line data ──────────────────────────────────────────────────────

/// One scan line as analog-output setpoints: one row per scan axis, all of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePath {
    rows: Vec<Vec<f64>>,
}

impl LinePath {
    /// Build a path from per-axis rows.
    ///
    /// # Errors
    /// `ScanError::Configuration` if there are no rows, a row is empty, or
    /// the rows differ in length.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, ScanError> {
        let Some(first) = rows.first() else {
            return Err(ScanError::Configuration("line path has no axes".into()));
        };
        let samples = first.len();
        if samples == 0 {
            return Err(ScanError::Configuration("line path is empty".into()));
        }
        if rows.iter().any(|row| row.len() != samples) {
            return Err(ScanError::Configuration(
                "line path rows differ in length".into(),
            ));
        }
        Ok(Self { rows })
    }

    /// Stack a single-axis ramp with the remaining axes held at `hold`.
    ///
    /// `hold[scan_axis]` is ignored.
    pub fn from_ramp(scan_axis: usize, ramp: &[f64], hold: &[f64]) -> Result<Self, ScanError> {
        if scan_axis >= hold.len() {
            return Err(ScanError::Configuration(format!(
                "scan axis {scan_axis} out of range for {} axes",
                hold.len()
            )));
        }
        let rows = hold
            .iter()
            .enumerate()
            .map(|(axis, &value)| {
                if axis == scan_axis {
                    ramp.to_vec()
                } else {
                    vec![value; ramp.len()]
                }
            })
            .collect();
        Self::new(rows)
    }

    /// Number of axes (rows).
    #[inline]
    pub fn axes(&self) -> usize {
        self.rows.len()
    }

    /// Number of samples per axis.
    #[inline]
    pub fn samples(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Per-axis rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}

/// Counts-per-second rows returned by a scan line.
///
/// A successful line is `1 x N`. A failed line is the `[[-1]]` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountsArray {
    rows: Vec<Vec<f64>>,
}

impl CountsArray {
    /// Wrap a single line of rates.
    pub fn from_line(line: Vec<f64>) -> Self {
        Self { rows: vec![line] }
    }

    /// The `[[-1]]` failure sentinel.
    pub fn failure() -> Self {
        Self::from_line(vec![FAILED_LINE_SENTINEL])
    }

    /// True for the failure sentinel.
    pub fn is_failure(&self) -> bool {
        self.rows.len() == 1 && self.rows[0].len() == 1 && self.rows[0][0] == FAILED_LINE_SENTINEL
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    /// First row.
    pub fn line(&self) -> &[f64] {
        self.rows.first().map_or(&[], Vec::as_slice)
    }

    /// Consume into the first row.
    pub fn into_line(self) -> Vec<f64> {
        self.rows.into_iter().next().unwrap_or_default()
    }

    /// All rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}
