//! Workspace-wide constants and defaults.

/// Maximum number of analog-output scan axes (x, y, z, a).
pub const MAX_SCAN_AXES: usize = 4;

/// Axis labels in analog-output channel order.
pub const SCANNER_AXIS_NAMES: [&str; MAX_SCAN_AXES] = ["x", "y", "z", "a"];

/// Default per-sample read/write timeout in seconds.
pub const DEFAULT_RW_TIMEOUT_S: f64 = 10.0;

/// Upper bound accepted for the per-sample read/write timeout in seconds.
pub const MAX_RW_TIMEOUT_S: f64 = 3600.0;

/// Samples configured for a continuous (free-running) clock task.
pub const CONTINUOUS_CLOCK_SAMPLES: usize = 10_000;

/// Default clock duty cycle.
pub const DEFAULT_DUTY_CYCLE: f64 = 0.5;

/// Default number of smoothing steps on each end of a ramp.
pub const DEFAULT_SMOOTHING_STEPS: usize = 10;

/// Default bound of the history list.
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 10;

/// Tolerance applied to voltage range containment checks.
pub const VOLTAGE_EPSILON: f64 = 1e-9;

/// Scan speed clip range (position units per second).
pub const SCAN_SPEED_LIMITS: (f64, f64) = (1e-9, 2e6);

/// Repeat count clip range.
pub const SCAN_REPEAT_LIMITS: (usize, usize) = (1, 1_000_000);

/// Samples per line accepted by a session.
pub const SCAN_RESOLUTION_LIMITS: (usize, usize) = (2, 1_000_000);

/// Value written into a failed counts array.
pub const FAILED_LINE_SENTINEL: f64 = -1.0;

/// Tag used when the scanner moves the confocal cursor.
pub const CONFOCAL_TAG: &str = "laserscanner";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/qscan/qscan.toml";
