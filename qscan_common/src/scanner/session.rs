//! Scan session settings.
//!
//! A `ScanSession` is configured while the controller is idle, frozen for the
//! duration of a scan, and copied into every history entry.

use crate::consts::{
    DEFAULT_SMOOTHING_STEPS, MAX_SCAN_AXES, SCAN_REPEAT_LIMITS, SCAN_RESOLUTION_LIMITS,
    SCAN_SPEED_LIMITS,
};
use crate::scanner::error::ScanError;
use serde::{Deserialize, Serialize};

/// What a custom scan varies between lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomScanMode {
    /// One line per confocal XY pixel.
    #[default]
    XyPlot,
    /// Step an auxiliary analog output between lines.
    Ao,
    /// User supplied function between lines.
    Function,
}

/// Grid for custom scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomScanSettings {
    /// First-order (fast) confocal range.
    pub x_range: (f64, f64),
    /// Second-order (slow) confocal range.
    pub y_range: (f64, f64),
    /// Pixels along `x_range`.
    pub order_1_resolution: usize,
    /// Pixels along `y_range`.
    pub order_2_resolution: usize,
}

impl Default for CustomScanSettings {
    fn default() -> Self {
        Self {
            x_range: (0.0, 1e-6),
            y_range: (0.0, 1e-6),
            order_1_resolution: 10,
            order_2_resolution: 10,
        }
    }
}

impl CustomScanSettings {
    /// Pixels of the grid, `None` on overflow.
    pub fn pixel_count(&self) -> Option<usize> {
        self.order_1_resolution.checked_mul(self.order_2_resolution)
    }

    /// Confocal `(x, y)` for line `index`, x varying fastest.
    pub fn pixel_position(&self, index: usize) -> (f64, f64) {
        let n1 = self.order_1_resolution.max(1);
        let n2 = self.order_2_resolution.max(1);
        let i = index % n1;
        let j = (index / n1) % n2;
        (
            grid_value(self.x_range, i, n1),
            grid_value(self.y_range, j, n2),
        )
    }
}

fn grid_value(range: (f64, f64), index: usize, count: usize) -> f64 {
    if count < 2 {
        return range.0;
    }
    range.0 + (range.1 - range.0) * index as f64 / (count - 1) as f64
}

fn default_smoothing_steps() -> usize {
    DEFAULT_SMOOTHING_STEPS
}

fn default_true() -> bool {
    true
}

/// Settings of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Analog-output axis that is ramped; the others are held.
    #[serde(default)]
    pub scan_axis: usize,
    /// Ramp start and end in position units. `start > end` scans downwards.
    pub scan_range: (f64, f64),
    /// Requested samples per line.
    pub resolution: usize,
    /// Ramp speed in position units per second.
    pub scan_speed: f64,
    /// Pixel clock in Hz.
    pub clock_frequency: f64,
    /// Lines to acquire before stopping.
    pub number_of_repeats: usize,
    /// Smoothing steps on each end of the ramp.
    #[serde(default = "default_smoothing_steps")]
    pub smoothing_steps: usize,
    /// Drive the axis back after every line.
    #[serde(default = "default_true")]
    pub retrace: bool,
    #[serde(default)]
    pub custom_scan: bool,
    #[serde(default)]
    pub custom_scan_mode: CustomScanMode,
    #[serde(default)]
    pub custom_scan_settings: CustomScanSettings,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self {
            scan_axis: 0,
            scan_range: (0.0, 1.0),
            resolution: 100,
            scan_speed: 1.0,
            clock_frequency: 100.0,
            number_of_repeats: 1,
            smoothing_steps: DEFAULT_SMOOTHING_STEPS,
            retrace: true,
            custom_scan: false,
            custom_scan_mode: CustomScanMode::XyPlot,
            custom_scan_settings: CustomScanSettings::default(),
        }
    }
}

impl ScanSession {
    /// Validate the session.
    ///
    /// # Errors
    /// `ScanError::Configuration` describing the first violated rule.
    pub fn validate(&self) -> Result<(), ScanError> {
        let (start, end) = self.scan_range;
        if !(start.is_finite() && end.is_finite()) {
            return Err(ScanError::Configuration(
                "scan range must be finite".to_string(),
            ));
        }
        if self.scan_axis >= MAX_SCAN_AXES {
            return Err(ScanError::Configuration(format!(
                "scan axis {} exceeds {} axes",
                self.scan_axis, MAX_SCAN_AXES
            )));
        }
        let (min_resolution, max_resolution) = SCAN_RESOLUTION_LIMITS;
        if !(min_resolution..=max_resolution).contains(&self.resolution) {
            return Err(ScanError::Configuration(format!(
                "resolution must be in {}..={}, got {}",
                min_resolution, max_resolution, self.resolution
            )));
        }
        if !(self.scan_speed.is_finite() && self.scan_speed > 0.0) {
            return Err(ScanError::Configuration(format!(
                "scan speed must be positive, got {}",
                self.scan_speed
            )));
        }
        if !(self.clock_frequency.is_finite() && self.clock_frequency > 0.0) {
            return Err(ScanError::Configuration(format!(
                "clock frequency must be positive, got {}",
                self.clock_frequency
            )));
        }
        let (min_repeats, max_repeats) = SCAN_REPEAT_LIMITS;
        if !(min_repeats..=max_repeats).contains(&self.number_of_repeats) {
            return Err(ScanError::Configuration(format!(
                "number of repeats must be in {}..={}, got {}",
                min_repeats, max_repeats, self.number_of_repeats
            )));
        }
        if self.is_xy_plot() {
            let grid = &self.custom_scan_settings;
            if grid.x_range.0 > grid.x_range.1 || grid.y_range.0 > grid.y_range.1 {
                return Err(ScanError::Configuration(
                    "custom scan ranges must be ordered (x1 <= x2, y1 <= y2)".to_string(),
                ));
            }
            if grid.order_1_resolution == 0 || grid.order_2_resolution == 0 {
                return Err(ScanError::Configuration(
                    "custom scan resolutions must be at least 1".to_string(),
                ));
            }
            match grid.pixel_count() {
                Some(pixels) if pixels <= max_repeats => {}
                _ => {
                    return Err(ScanError::Configuration(format!(
                        "custom scan grid {}x{} exceeds {} lines",
                        grid.order_1_resolution, grid.order_2_resolution, max_repeats
                    )));
                }
            }
        }
        Ok(())
    }

    /// `resolution / (|span| / speed)`: the clock that traverses the range at
    /// `scan_speed` in `resolution` samples. `None` for an empty range.
    pub fn derived_clock_frequency(&self) -> Option<f64> {
        let span = (self.scan_range.1 - self.scan_range.0).abs();
        if span == 0.0 || !(self.scan_speed > 0.0) {
            return None;
        }
        Some(self.resolution as f64 / (span / self.scan_speed))
    }

    /// Recompute `clock_frequency` from range, speed and resolution.
    pub fn update_clock_frequency(&mut self) -> bool {
        match self.derived_clock_frequency() {
            Some(frequency) => {
                self.clock_frequency = frequency;
                true
            }
            None => false,
        }
    }

    /// Set the scan speed, clipped to the supported range.
    pub fn set_scan_speed(&mut self, speed: f64) {
        self.scan_speed = speed.clamp(SCAN_SPEED_LIMITS.0, SCAN_SPEED_LIMITS.1);
    }

    /// Set the repeat count, clipped to the supported range.
    pub fn set_number_of_repeats(&mut self, repeats: usize) {
        self.number_of_repeats = repeats.clamp(SCAN_REPEAT_LIMITS.0, SCAN_REPEAT_LIMITS.1);
    }

    /// True for a custom XY-plot scan.
    pub fn is_xy_plot(&self) -> bool {
        self.custom_scan && self.custom_scan_mode == CustomScanMode::XyPlot
    }

    /// Lines acquired by this session. Saturates for a grid that
    /// [`validate`](Self::validate) rejects.
    pub fn effective_repeats(&self) -> usize {
        if self.is_xy_plot() {
            self.custom_scan_settings
                .pixel_count()
                .unwrap_or(usize::MAX)
        } else {
            self.number_of_repeats
        }
    }

    /// Whether a stopped scan of this kind may be continued.
    pub fn supports_continue(&self) -> bool {
        !self.custom_scan
    }
}
