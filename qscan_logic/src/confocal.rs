//! Narrow interface to the confocal (XY imaging) logic.
//!
//! The scan loop only needs to move the confocal spot before custom XY-plot
//! lines and to read the image ranges it may move in.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Ranges of the confocal image, in the confocal's position units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageRanges {
    pub x: (f64, f64),
    pub y: (f64, f64),
    pub z: (f64, f64),
}

impl Default for ImageRanges {
    fn default() -> Self {
        Self {
            x: (0.0, 1e-6),
            y: (0.0, 1e-6),
            z: (0.0, 1e-6),
        }
    }
}

/// Positioning surface of the confocal logic.
pub trait ConfocalPositioner: Send {
    /// Move the confocal spot; `tag` names the requesting module.
    fn set_position(&mut self, tag: &str, x: f64, y: f64, z: f64);

    /// Ranges currently imaged.
    fn image_ranges(&self) -> ImageRanges;
}

/// Stand-in used when no confocal logic is attached: logs every move.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfocal {
    ranges: ImageRanges,
    position: Option<(f64, f64, f64)>,
}

impl LoggingConfocal {
    pub fn new(ranges: ImageRanges) -> Self {
        Self {
            ranges,
            position: None,
        }
    }

    /// Last requested position.
    pub fn position(&self) -> Option<(f64, f64, f64)> {
        self.position
    }
}

impl ConfocalPositioner for LoggingConfocal {
    fn set_position(&mut self, tag: &str, x: f64, y: f64, z: f64) {
        info!("Confocal move by {}: ({:.3e}, {:.3e}, {:.3e})", tag, x, y, z);
        self.position = Some((x, y, z));
    }

    fn image_ranges(&self) -> ImageRanges {
        self.ranges
    }
}
