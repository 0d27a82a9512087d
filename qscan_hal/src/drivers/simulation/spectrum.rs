//! Detector count-rate model as a function of the scan voltage.

use serde::{Deserialize, Serialize};

/// One Lorentzian line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralLine {
    /// Voltage at the line center.
    pub center_voltage: f64,
    /// Rate above background at the center, counts/s.
    pub peak_rate: f64,
    /// Half width at half maximum, volts.
    pub width_voltage: f64,
}

/// Background plus a sum of Lorentzian lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumModel {
    /// Flat dark/background rate, counts/s.
    pub background_rate: f64,
    /// Resonances.
    pub lines: Vec<SpectralLine>,
}

impl Default for SpectrumModel {
    fn default() -> Self {
        Self {
            background_rate: 2000.0,
            lines: vec![SpectralLine {
                center_voltage: 0.0,
                peak_rate: 50_000.0,
                width_voltage: 0.2,
            }],
        }
    }
}

impl SpectrumModel {
    /// Expected count rate at `voltage`.
    pub fn rate_at(&self, voltage: f64) -> f64 {
        self.lines
            .iter()
            .map(|line| {
                let w2 = line.width_voltage * line.width_voltage;
                let d = voltage - line.center_voltage;
                if w2 == 0.0 {
                    if d == 0.0 { line.peak_rate } else { 0.0 }
                } else {
                    line.peak_rate * w2 / (d * d + w2)
                }
            })
            .sum::<f64>()
            + self.background_rate
    }
}
