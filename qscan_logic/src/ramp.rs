//! Smoothed ramp generation.
//!
//! A ramp moves one axis from `start` to `end` in three segments:
//!
//! ```text
//!  position
//!     ▲                       ___──  decelerate (s points, mirrored)
//!     │                 ___───
//!     │           ___───             linear (resolution - 2s points)
//!     │     __────
//!     │ _──                          accelerate (s points)
//!     └──────────────────────────► sample
//! ```
//!
//! The accelerate segment grows its increments linearly, `n * step / (s + 1)`
//! for `n = 1..=s`, where `step = speed / clock_frequency`. The ramp is always
//! built from the lower to the higher value and reversed for downward scans,
//! so `generate(a, b)` is exactly `generate(b, a)` reversed.

use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::session::ScanSession;
use tracing::debug;

/// Immutable ordered setpoints of one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp(Vec<f64>);

impl Ramp {
    /// Setpoints in traversal order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<f64> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.0.last().copied()
    }

    /// Smallest and largest setpoint.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let first = self.first()?;
        let last = self.last()?;
        Some((first.min(last), first.max(last)))
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl AsRef<[f64]> for Ramp {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Ramp parameters of a scan session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampGenerator {
    /// Position units per second on the linear segment.
    pub speed: f64,
    /// Samples per second.
    pub clock_frequency: f64,
    /// Points in each of the accelerate and decelerate segments.
    pub smoothing_steps: usize,
    /// Requested points per ramp.
    pub resolution: usize,
}

impl RampGenerator {
    pub fn from_session(session: &ScanSession) -> Self {
        Self {
            speed: session.scan_speed,
            clock_frequency: session.clock_frequency,
            smoothing_steps: session.smoothing_steps,
            resolution: session.resolution,
        }
    }

    /// Distance covered by one sample on the linear segment.
    pub fn linear_step(&self) -> f64 {
        self.speed / self.clock_frequency
    }

    /// Distance covered by the accelerate segment.
    pub fn accel_span(&self) -> f64 {
        // Σ n·step/(s+1) for n = 1..=s
        self.linear_step() * self.smoothing_steps as f64 / 2.0
    }

    /// Build the ramp from `start` to `end`.
    ///
    /// Falls back to a plain linear ramp when the smoothing would overshoot
    /// the range or does not fit into `resolution`.
    ///
    /// # Errors
    /// `ScanError::Configuration` for non-positive speed or clock frequency,
    /// a resolution below 2, or non-finite end points.
    pub fn generate(&self, start: f64, end: f64) -> Result<Ramp, ScanError> {
        self.validate()?;
        if !(start.is_finite() && end.is_finite()) {
            return Err(ScanError::Configuration(format!(
                "ramp end points must be finite, got {start} -> {end}"
            )));
        }
        if start == end {
            return Ok(Ramp(vec![start, end]));
        }

        let (lo, hi) = if start < end { (start, end) } else { (end, start) };
        let mut points = self.build_upward(lo, hi);
        if start > end {
            points.reverse();
        }
        Ok(Ramp(points))
    }

    fn validate(&self) -> Result<(), ScanError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ScanError::Configuration(format!(
                "ramp speed must be positive, got {}",
                self.speed
            )));
        }
        if !(self.clock_frequency.is_finite() && self.clock_frequency > 0.0) {
            return Err(ScanError::Configuration(format!(
                "ramp clock frequency must be positive, got {}",
                self.clock_frequency
            )));
        }
        if self.resolution < 2 {
            return Err(ScanError::Configuration(format!(
                "ramp resolution must be at least 2, got {}",
                self.resolution
            )));
        }
        Ok(())
    }

    fn build_upward(&self, lo: f64, hi: f64) -> Vec<f64> {
        let step = self.linear_step();
        let s = self.smoothing_steps;
        let span = hi - lo;
        let accel_span = self.accel_span();

        if span - 2.0 * accel_span < 0.0 {
            let points = ((span / step).round() as usize).max(2);
            debug!(
                "Smoothing overshoots {:.3e} span, linear ramp of {} points",
                span, points
            );
            return linspace(lo, hi, points);
        }
        if self.resolution < 2 * s + 1 {
            debug!(
                "Resolution {} too small for {} smoothing steps, linear ramp",
                self.resolution, s
            );
            return linspace(lo, hi, self.resolution);
        }

        let increment = step / (s + 1) as f64;
        let mut accel = Vec::with_capacity(s);
        let mut position = lo;
        for n in 0..s {
            accel.push(position);
            position += (n + 1) as f64 * increment;
        }

        let mut points = Vec::with_capacity(self.resolution);
        points.extend_from_slice(&accel);
        points.extend(linspace(
            lo + accel_span,
            hi - accel_span,
            self.resolution - 2 * s,
        ));
        points.extend(accel.iter().rev().map(|&a| hi - (a - lo)));
        points
    }
}

/// `count` evenly spaced points; the last one is exactly `end`.
fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![(start + end) / 2.0],
        _ => {
            let last = count - 1;
            (0..count)
                .map(|i| {
                    if i == last {
                        end
                    } else {
                        start + (end - start) * i as f64 / last as f64
                    }
                })
                .collect()
        }
    }
}
