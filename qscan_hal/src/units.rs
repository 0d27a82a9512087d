//! Position/voltage conversion.
//!
//! Each scan axis maps its physical position range affinely onto its
//! analog-output voltage range. Conversion is pure; range violations are
//! reported before anything reaches the hardware.

use qscan_common::hal::config::validate_ranges;
use qscan_common::hal::types::{LinePath, ValueRange};
use qscan_common::scanner::error::ScanError;

/// Affine position/voltage calibration for every scan axis.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConverter {
    position_ranges: Vec<ValueRange>,
    voltage_ranges: Vec<ValueRange>,
}

impl UnitConverter {
    /// Build a converter from per-axis calibration ranges.
    ///
    /// # Errors
    /// `ScanError::Configuration` if the lists differ in length, a range is
    /// unordered, or a position range has zero width.
    pub fn new(
        position_ranges: Vec<ValueRange>,
        voltage_ranges: Vec<ValueRange>,
    ) -> Result<Self, ScanError> {
        if position_ranges.len() != voltage_ranges.len() {
            return Err(ScanError::Configuration(format!(
                "{} position ranges but {} voltage ranges",
                position_ranges.len(),
                voltage_ranges.len()
            )));
        }
        validate_ranges("position", &position_ranges)?;
        validate_ranges("voltage", &voltage_ranges)?;
        if let Some(axis) = position_ranges.iter().position(|r| r.span() == 0.0) {
            return Err(ScanError::Configuration(format!(
                "position range on axis {axis} has zero width"
            )));
        }
        Ok(Self {
            position_ranges,
            voltage_ranges,
        })
    }

    /// Number of calibrated axes.
    pub fn axes(&self) -> usize {
        self.position_ranges.len()
    }

    /// Position range per axis.
    pub fn position_ranges(&self) -> &[ValueRange] {
        &self.position_ranges
    }

    /// Voltage range per axis.
    pub fn voltage_ranges(&self) -> &[ValueRange] {
        &self.voltage_ranges
    }

    /// Reject positions outside the configured range of `axis`.
    pub fn check_position(&self, axis: usize, position: f64) -> Result<(), ScanError> {
        let range = self.position_range(axis)?;
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

    /// Map a position on `axis` to its output voltage.
    ///
    /// # Errors
    /// `ScanError::Range` if the voltage falls outside the voltage range by
    /// more than [`VOLTAGE_EPSILON`](qscan_common::consts::VOLTAGE_EPSILON).
    pub fn position_to_voltage(&self, axis: usize, position: f64) -> Result<f64, ScanError> {
        let positions = self.position_range(axis)?;
        let volts = self.voltage_range(axis)?;
        let voltage = volts.min + (position - positions.min) * volts.span() / positions.span();
        if !volts.contains(voltage) {
            return Err(ScanError::Range {
                quantity: "voltage",
                axis,
                value: voltage,
                min: volts.min,
                max: volts.max,
            });
        }
        Ok(voltage)
    }

    /// Map an output voltage on `axis` back to a position.
    pub fn voltage_to_position(&self, axis: usize, voltage: f64) -> Result<f64, ScanError> {
        let positions = self.position_range(axis)?;
        let volts = self.voltage_range(axis)?;
        if volts.span() == 0.0 {
            return Ok(positions.min);
        }
        Ok(positions.min + (voltage - volts.min) * positions.span() / volts.span())
    }

    /// Convert every row of a line path; fails on the first out-of-range sample.
    pub fn line_to_voltages(&self, path: &LinePath) -> Result<Vec<Vec<f64>>, ScanError> {
        if path.axes() != self.axes() {
            return Err(ScanError::Configuration(format!(
                "line path has {} axes, scanner has {}",
                path.axes(),
                self.axes()
            )));
        }
        path.rows()
            .iter()
            .enumerate()
            .map(|(axis, row)| {
                row.iter()
                    .map(|&position| self.position_to_voltage(axis, position))
                    .collect()
            })
            .collect()
    }

    fn position_range(&self, axis: usize) -> Result<ValueRange, ScanError> {
        self.position_ranges
            .get(axis)
            .copied()
            .ok_or_else(|| ScanError::Configuration(format!("no axis {axis}")))
    }

    fn voltage_range(&self, axis: usize) -> Result<ValueRange, ScanError> {
        self.voltage_ranges
            .get(axis)
            .copied()
            .ok_or_else(|| ScanError::Configuration(format!("no axis {axis}")))
    }
}
