//! Static hardware configuration.
//!
//! - `ScannerConfig` - DAQ side: analog channels, ranges, clock wiring
//! - `TaggerConfig` - photon-counter side: detector and marker inputs
//!
//! Both are loaded once at activation and are not reloaded mid-scan.

use crate::consts::{DEFAULT_RW_TIMEOUT_S, MAX_RW_TIMEOUT_S, MAX_SCAN_AXES};
use crate::hal::driver::{CHANNEL_NAMES, HalError};
use crate::hal::types::ValueRange;
use serde::{Deserialize, Serialize};

fn default_rw_timeout_s() -> f64 {
    DEFAULT_RW_TIMEOUT_S
}

fn default_clock_frequency() -> f64 {
    100.0
}

/// DAQ-side configuration of the scanner.
///
/// # TOML Example
///
/// ```toml
/// [scanner]
/// ao_channels = ["/Dev1/AO0", "/Dev1/AO1", "/Dev1/AO2", "/Dev1/AO3"]
/// voltage_ranges = [[-10.0, 10.0], [-10.0, 10.0], [-10.0, 10.0], [-4.0, 4.0]]
/// position_ranges = [[0.0, 1e-4], [0.0, 1e-4], [-1e-4, 1e-4], [-40e3, 40e3]]
/// clock_channel = "/Dev1/Ctr2"
/// pixel_clock_channel = "/Dev1/PFI6"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Per-sample read/write timeout in seconds.
    #[serde(default = "default_rw_timeout_s")]
    pub read_write_timeout_s: f64,

    /// Analog-output channels in axis order (x, y, z, a).
    pub ao_channels: Vec<String>,

    /// Voltage range per analog-output channel.
    pub voltage_ranges: Vec<ValueRange>,

    /// Physical position range per analog-output channel.
    pub position_ranges: Vec<ValueRange>,

    /// Counter channel generating the scan clock.
    pub clock_channel: String,

    /// Default scan clock frequency in Hz.
    #[serde(default = "default_clock_frequency")]
    pub clock_frequency: f64,

    /// PFI line the clock is routed to when a pixel clock is requested.
    #[serde(default)]
    pub pixel_clock_channel: Option<String>,

    /// Analog-input channels sampled alongside the ramp.
    #[serde(default)]
    pub ai_channels: Vec<String>,

    /// Voltage range per analog-input channel.
    #[serde(default)]
    pub ai_voltage_ranges: Vec<ValueRange>,
}

impl ScannerConfig {
    /// Validate the scanner configuration.
    ///
    /// # Validation Rules
    /// 1. 1..=MAX_SCAN_AXES analog-output channels
    /// 2. one voltage range and one position range per channel, each ordered
    /// 3. analog-input channels and ranges have equal length
    /// 4. clock channel set, clock frequency positive
    /// 5. timeout in `(0, MAX_RW_TIMEOUT_S]`
    pub fn validate(&self) -> Result<(), HalError> {
        if self.ao_channels.is_empty() || self.ao_channels.len() > MAX_SCAN_AXES {
            return Err(HalError::ConfigError(format!(
                "Expected 1..={} analog output channels, got {}",
                MAX_SCAN_AXES,
                self.ao_channels.len()
            )));
        }

        if self.voltage_ranges.len() != self.ao_channels.len() {
            return Err(HalError::ConfigError(format!(
                "Got {} voltage ranges for {} analog output channels",
                self.voltage_ranges.len(),
                self.ao_channels.len()
            )));
        }

        if self.position_ranges.len() != self.ao_channels.len() {
            return Err(HalError::ConfigError(format!(
                "Got {} position ranges for {} analog output channels",
                self.position_ranges.len(),
                self.ao_channels.len()
            )));
        }

        validate_ranges("voltage", &self.voltage_ranges)?;
        validate_ranges("position", &self.position_ranges)?;

        if self.ai_channels.len() != self.ai_voltage_ranges.len() {
            return Err(HalError::ConfigError(format!(
                "Got {} voltage ranges for {} analog input channels",
                self.ai_voltage_ranges.len(),
                self.ai_channels.len()
            )));
        }
        validate_ranges("analog input voltage", &self.ai_voltage_ranges)?;

        if self.clock_channel.trim().is_empty() {
            return Err(HalError::ConfigError(
                "clock_channel must be set".to_string(),
            ));
        }

        if !(self.clock_frequency.is_finite() && self.clock_frequency > 0.0) {
            return Err(HalError::ConfigError(format!(
                "clock_frequency must be positive, got {}",
                self.clock_frequency
            )));
        }

        if !(self.read_write_timeout_s > 0.0 && self.read_write_timeout_s <= MAX_RW_TIMEOUT_S) {
            return Err(HalError::ConfigError(format!(
                "read_write_timeout_s must be in (0, {}], got {}",
                MAX_RW_TIMEOUT_S, self.read_write_timeout_s
            )));
        }

        Ok(())
    }

    /// Number of scan axes.
    #[inline]
    pub fn axis_count(&self) -> usize {
        self.ao_channels.len()
    }
}

/// Check every range is finite and ordered.
pub fn validate_ranges(what: &str, ranges: &[ValueRange]) -> Result<(), HalError> {
    for (axis, range) in ranges.iter().enumerate() {
        if !range.is_valid() {
            return Err(HalError::ConfigError(format!(
                "Invalid {what} range {range} on axis {axis}: min must not exceed max"
            )));
        }
    }
    Ok(())
}

fn default_marker_channel() -> String {
    "eight".to_string()
}

/// Photon-counter side configuration.
///
/// # TOML Example
///
/// ```toml
/// [tagger]
/// detector_channels = ["one", "two"]
/// marker_channel = "eight"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggerConfig {
    /// Inputs wired to photon detectors; more than one is merged by a combiner.
    pub detector_channels: Vec<String>,

    /// Input receiving the pixel clock edges.
    #[serde(default = "default_marker_channel")]
    pub marker_channel: String,
}

impl TaggerConfig {
    /// Validate channel names.
    pub fn validate(&self) -> Result<(), HalError> {
        if self.detector_channels.is_empty() {
            return Err(HalError::ConfigError(
                "At least one detector channel is required".to_string(),
            ));
        }

        for name in self
            .detector_channels
            .iter()
            .chain(std::iter::once(&self.marker_channel))
        {
            if !CHANNEL_NAMES.contains(&name.as_str()) {
                return Err(HalError::ConfigError(format!(
                    "Unknown photon counter input '{name}'"
                )));
            }
        }

        if self.detector_channels.contains(&self.marker_channel) {
            return Err(HalError::ConfigError(format!(
                "Marker channel '{}' is also a detector channel",
                self.marker_channel
            )));
        }

        Ok(())
    }
}
