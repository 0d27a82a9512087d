//! Prelude module for common re-exports.
//!
//! ```rust
//! use qscan_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{MAX_SCAN_AXES, SCANNER_AXIS_NAMES, VOLTAGE_EPSILON};

// ─── Hardware contracts ─────────────────────────────────────────────
pub use crate::hal::config::{ScannerConfig, TaggerConfig};
pub use crate::hal::driver::{CounterMeasurement, DaqDevice, HalError, PhotonCounter};
pub use crate::hal::types::{CountsArray, LinePath, TaskHandle, TaskKind, TaskState, ValueRange};

// ─── Scanner ────────────────────────────────────────────────────────
pub use crate::scanner::error::ScanError;
pub use crate::scanner::session::{CustomScanMode, ScanSession};
pub use crate::scanner::state::ScanState;
