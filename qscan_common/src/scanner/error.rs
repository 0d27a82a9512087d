//! Scan error taxonomy.
//!
//! Configuration and range errors are raised synchronously by the call that
//! would violate them and are never partially applied. Hardware errors raised
//! during a scan line are converted into a discarded line by the caller.

use crate::hal::driver::HalError;
use thiserror::Error;

/// Errors raised by the interfuse layer and the scan controller.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Malformed channel, range or session settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A position or voltage outside its configured bounds.
    #[error("{quantity} {value} on axis {axis} outside range [{min}, {max}]")]
    Range {
        /// What was checked ("position", "voltage").
        quantity: &'static str,
        /// Axis index.
        axis: usize,
        /// Offending value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Start requested while a scan is already running.
    #[error("A scan is already running")]
    AlreadyRunning,

    /// Operation requires the controller to be idle.
    #[error("Operation requires an idle scanner")]
    NotIdle,

    /// Nothing to continue.
    #[error("Scan cannot be continued: {0}")]
    NotContinuable(String),

    /// Failure inside a hardware transaction.
    #[error("Hardware I/O error: {0}")]
    HardwareIo(HalError),

    /// A history entry does not fit the live buffers.
    #[error("History restore failed: {0}")]
    Restore(String),

    /// The controller worker is gone.
    #[error("Scan worker is not running")]
    QueueClosed,
}

impl From<HalError> for ScanError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::ConfigError(message) => ScanError::Configuration(message),
            other => ScanError::HardwareIo(other),
        }
    }
}

impl ScanError {
    /// True for errors caused by the hardware rather than by the caller.
    pub fn is_hardware(&self) -> bool {
        matches!(self, ScanError::HardwareIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hal_config_errors_become_configuration_errors() {
        let err: ScanError = HalError::ConfigError("bad channel".into()).into();
        assert!(matches!(err, ScanError::Configuration(ref m) if m == "bad channel"));
        assert!(!err.is_hardware());
    }

    #[test]
    fn hal_io_errors_become_hardware_errors() {
        let err: ScanError = HalError::Timeout(Duration::from_secs(2)).into();
        assert!(err.is_hardware());
        assert!(err.to_string().contains("Timed out"));
    }

    #[test]
    fn range_error_names_axis_and_bounds() {
        let err = ScanError::Range {
            quantity: "voltage",
            axis: 3,
            value: 4.5,
            min: -4.0,
            max: 4.0,
        };
        let text = err.to_string();
        assert!(text.contains("axis 3"));
        assert!(text.contains("4.5"));
    }
}
