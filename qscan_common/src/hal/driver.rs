//! Hardware collaborator traits and error types.
//!
//! This module defines:
//! - `DaqDevice` trait - NI-DAQ-like card (counter output, analog output/input)
//! - `PhotonCounter` trait - TimeTagger-like photon counter
//! - `CounterMeasurement` trait - a running measurement on the photon counter
//! - `HalError` enum - Error types for hardware operations
//! - `BackendFactory` type alias - Factory function type for a backend pair

use crate::hal::types::{SampleMode, TaskHandle, TimingType, ValueRange};
use std::time::Duration;
use thiserror::Error;

/// Error types for hardware operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Device initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hardware communication error
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// A blocking wait exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Handle does not name a live task on this device
    #[error("Invalid task: {0}")]
    InvalidTask(TaskHandle),

    /// Backend not found in the registry
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// State persistence error
    #[error("State persistence error: {0}")]
    PersistenceError(String),
}

/// A DAQ card and a photon counter, created together by one backend.
pub struct HardwareBackend {
    /// Analog/counter I/O card.
    pub daq: Box<dyn DaqDevice>,
    /// Photon counter.
    pub counter: Box<dyn PhotonCounter>,
}

/// Factory function type for creating a backend.
///
/// The argument is the backend's own table from the configuration file, if present.
pub type BackendFactory = fn(Option<&toml::Value>) -> Result<HardwareBackend, HalError>;

/// DAQ card contract.
///
/// Tasks are addressed by [`TaskHandle`]; the device owns the underlying task
/// objects. Any operation on a closed or unknown handle fails with
/// `HalError::InvalidTask`.
pub trait DaqDevice: Send {
    /// Device identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Create a counter-output pulse task on `channel`.
    fn create_co_task(
        &mut self,
        task_name: &str,
        channel: &str,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<TaskHandle, HalError>;

    /// Create an analog-output task over `channels`.
    fn create_ao_task(
        &mut self,
        task_name: &str,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<TaskHandle, HalError>;

    /// Create an analog-input task over `channels`.
    fn create_ai_task(
        &mut self,
        task_name: &str,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<TaskHandle, HalError>;

    /// Write one row of voltages per channel.
    ///
    /// With `auto_start` the task is started, the samples are generated and
    /// the call returns once they are written (on-demand use).
    fn write_task(
        &mut self,
        task: TaskHandle,
        data: &[Vec<f64>],
        auto_start: bool,
    ) -> Result<(), HalError>;

    /// Read `samples` values per channel, channels concatenated.
    fn read_task(&mut self, task: TaskHandle, samples: usize) -> Result<Vec<f64>, HalError>;

    /// Clock the task from `source` at `rate` for `samples_per_channel` samples.
    fn cfg_samp_clk_timing(
        &mut self,
        task: TaskHandle,
        rate: f64,
        source: &str,
        samples_per_channel: usize,
    ) -> Result<(), HalError>;

    /// Configure implicit (counter) timing.
    fn cfg_implicit_timing(
        &mut self,
        task: TaskHandle,
        mode: SampleMode,
        samples_per_channel: usize,
    ) -> Result<(), HalError>;

    /// Switch the timing type of a task (e.g. back to on-demand).
    fn set_timing_type(&mut self, task: TaskHandle, timing: TimingType) -> Result<(), HalError>;

    /// Route a counter output terminal to a PFI line.
    fn connect_ctr_to_pfi(&mut self, counter_channel: &str, pfi: &str) -> Result<(), HalError>;

    /// Remove a route created by [`DaqDevice::connect_ctr_to_pfi`].
    fn disconnect_ctr_to_pfi(&mut self, counter_channel: &str, pfi: &str) -> Result<(), HalError>;

    /// Start a task.
    fn start_task(&mut self, task: TaskHandle) -> Result<(), HalError>;

    /// Stop a task. Stopping a stopped task is not an error.
    fn stop_task(&mut self, task: TaskHandle) -> Result<(), HalError>;

    /// Release a task. The handle is invalid afterwards.
    fn close_task(&mut self, task: TaskHandle) -> Result<(), HalError>;

    /// Block until a finite task has produced all its samples.
    ///
    /// # Errors
    /// `HalError::Timeout` if `timeout` elapses first.
    fn wait_until_done(&mut self, task: TaskHandle, timeout: Duration) -> Result<(), HalError>;

    /// Reset the device, invalidating every task.
    fn reset_hardware(&mut self) -> Result<(), HalError>;
}

/// A measurement object living on the photon counter.
pub trait CounterMeasurement: Send {
    /// Start (or restart) accumulation.
    fn start(&mut self) -> Result<(), HalError>;

    /// Stop accumulation, keeping the data.
    fn stop(&mut self) -> Result<(), HalError>;

    /// Discard accumulated data.
    fn clear(&mut self) -> Result<(), HalError>;

    /// True once all requested bins are filled.
    fn ready(&self) -> bool;

    /// Accumulated values. May contain NaN for bins never closed.
    fn data(&self) -> Result<Vec<f64>, HalError>;
}

/// Start-stop histogram parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramConfig {
    /// Click channel.
    pub channel: i32,
    /// Start (trigger) channel.
    pub trigger_channel: i32,
    /// Bin width in picoseconds.
    pub bin_width_ps: u64,
    /// Number of bins.
    pub number_of_bins: usize,
}

/// Cross-correlation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationConfig {
    /// First channel.
    pub channel_start: i32,
    /// Second channel.
    pub channel_stop: i32,
    /// Bin width in picoseconds.
    pub bin_width_ps: u64,
    /// Number of bins.
    pub number_of_bins: usize,
}

/// Photon counter contract.
pub trait PhotonCounter: Send {
    /// Device identifier.
    fn name(&self) -> &'static str;

    /// Map a symbolic input name (`"one"` .. `"eight"`) to the hardware channel number.
    fn channel_code(&self, name: &str) -> Option<i32> {
        CHANNEL_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| index as i32 + 1)
    }

    /// Merge several inputs into one virtual channel; returns its number.
    fn combiner(&mut self, channels: &[i32]) -> Result<i32, HalError>;

    /// Count clicks between consecutive edges on `begin_channel`.
    fn count_between_markers(
        &mut self,
        click_channel: i32,
        begin_channel: i32,
        end_channel: Option<i32>,
        n_values: usize,
    ) -> Result<Box<dyn CounterMeasurement>, HalError>;

    /// Start-stop histogram.
    fn histogram(&mut self, config: &HistogramConfig)
    -> Result<Box<dyn CounterMeasurement>, HalError>;

    /// Cross-correlation between two channels.
    fn correlation(
        &mut self,
        config: &CorrelationConfig,
    ) -> Result<Box<dyn CounterMeasurement>, HalError>;

    /// Average count rate per channel.
    fn countrate(&mut self, channels: &[i32]) -> Result<Box<dyn CounterMeasurement>, HalError>;

    /// Rolling count trace; `refresh_rate` in Hz sets the bin width to `1e12 / refresh_rate` ps.
    fn counter(
        &mut self,
        channels: &[i32],
        refresh_rate: f64,
        n_values: usize,
    ) -> Result<Box<dyn CounterMeasurement>, HalError>;
}

/// Symbolic names of the photon counter inputs, channel 1 first.
pub const CHANNEL_NAMES: [&str; 8] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight",
];

/// Bin width in picoseconds for a counter refreshed at `refresh_rate` Hz.
pub fn bin_width_for_refresh_rate(refresh_rate: f64) -> Result<u64, HalError> {
    if !(refresh_rate.is_finite() && refresh_rate > 0.0) {
        return Err(HalError::ConfigError(format!(
            "refresh rate must be positive, got {refresh_rate}"
        )));
    }
    Ok((1e12 / refresh_rate).round() as u64)
}
