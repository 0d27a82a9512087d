//! Configuration of the `qscan` binary.
//!
//! One TOML file holds every table:
//!
//! ```toml
//! backend = "simulation"
//!
//! [shared]
//! service_name = "laser-scanner"
//!
//! [scanner]     # qscan_common::hal::config::ScannerConfig
//! [tagger]      # qscan_common::hal::config::TaggerConfig
//! [scan]        # first session
//! [cursor]
//! [history]
//! [confocal]
//! [simulation]  # table handed to the backend of the same name
//! ```

use crate::confocal::ImageRanges;
use crate::controller::ControllerSettings;
use qscan_common::config::{ConfigError, ConfigLoader, SharedConfig};
use qscan_common::consts::{DEFAULT_MAX_HISTORY_LENGTH, DEFAULT_SMOOTHING_STEPS};
use qscan_common::hal::config::{ScannerConfig, TaggerConfig};
use qscan_common::scanner::session::{CustomScanMode, CustomScanSettings, ScanSession};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_backend() -> String {
    "simulation".to_string()
}

fn default_repeats() -> usize {
    1
}

fn default_smoothing_steps() -> usize {
    DEFAULT_SMOOTHING_STEPS
}

fn default_true() -> bool {
    true
}

fn default_cursor_step() -> f64 {
    ControllerSettings::default().cursor_step
}

fn default_cursor_interval_ms() -> u64 {
    10
}

fn default_max_history_length() -> usize {
    DEFAULT_MAX_HISTORY_LENGTH
}

// ─── Tables ─────────────────────────────────────────────────────────

/// `[scan]`: the session the binary starts with.
///
/// `clock_frequency` is derived from range, speed and resolution when left
/// out; an empty range falls back to the scanner's default clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default)]
    pub scan_axis: usize,
    pub scan_range: (f64, f64),
    pub resolution: usize,
    pub scan_speed: f64,
    #[serde(default)]
    pub clock_frequency: Option<f64>,
    #[serde(default = "default_repeats")]
    pub number_of_repeats: usize,
    #[serde(default = "default_smoothing_steps")]
    pub smoothing_steps: usize,
    #[serde(default = "default_true")]
    pub retrace: bool,
    #[serde(default)]
    pub custom_scan: bool,
    #[serde(default)]
    pub custom_scan_mode: CustomScanMode,
    #[serde(default)]
    pub custom_scan_settings: CustomScanSettings,
}

impl ScanSettings {
    pub fn to_session(&self, default_clock: f64) -> ScanSession {
        let mut session = ScanSession {
            scan_axis: self.scan_axis,
            scan_range: self.scan_range,
            resolution: self.resolution,
            scan_speed: self.scan_speed,
            clock_frequency: self.clock_frequency.unwrap_or(default_clock),
            number_of_repeats: self.number_of_repeats,
            smoothing_steps: self.smoothing_steps,
            retrace: self.retrace,
            custom_scan: self.custom_scan,
            custom_scan_mode: self.custom_scan_mode,
            custom_scan_settings: self.custom_scan_settings,
        };
        if self.clock_frequency.is_none() {
            session.update_clock_frequency();
        }
        session
    }
}

/// `[cursor]`: tuning of the idle cursor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorSettings {
    #[serde(default = "default_cursor_step")]
    pub step: f64,
    #[serde(default = "default_cursor_interval_ms")]
    pub interval_ms: u64,
}

impl Default for CursorSettings {
    fn default() -> Self {
        Self {
            step: default_cursor_step(),
            interval_ms: default_cursor_interval_ms(),
        }
    }
}

impl CursorSettings {
    pub fn to_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            cursor_step: self.step,
            cursor_interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// `[history]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_max_history_length")]
    pub max_history_length: usize,
    /// History file; history is kept in memory only when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_history_length: default_max_history_length(),
            state_file: None,
        }
    }
}

// ─── Root ───────────────────────────────────────────────────────────

/// Complete configuration of the `qscan` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicConfig {
    pub shared: SharedConfig,
    /// Backend registry name.
    #[serde(default = "default_backend")]
    pub backend: String,
    pub scanner: ScannerConfig,
    pub tagger: TaggerConfig,
    pub scan: ScanSettings,
    #[serde(default)]
    pub cursor: CursorSettings,
    #[serde(default)]
    pub history: HistorySettings,
    /// Image ranges of the logging confocal stand-in.
    #[serde(default)]
    pub confocal: ImageRanges,
    /// Remaining tables, looked up by backend name.
    #[serde(flatten)]
    pub backend_tables: HashMap<String, toml::Value>,
}

impl LogicConfig {
    /// Initial session, clock derived where needed.
    pub fn session(&self) -> ScanSession {
        self.scan.to_session(self.scanner.clock_frequency)
    }

    /// Table configuring backend `name`, if present.
    pub fn backend_table(&self, name: &str) -> Option<&toml::Value> {
        self.backend_tables.get(name)
    }

    /// Check every table.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` naming the offending table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.scanner
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[scanner] {e}")))?;
        self.tagger
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[tagger] {e}")))?;

        let session = self.session();
        session
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[scan] {e}")))?;
        if session.scan_axis >= self.scanner.axis_count() {
            return Err(ConfigError::ValidationError(format!(
                "[scan] scan_axis {} but the scanner has {} axes",
                session.scan_axis,
                self.scanner.axis_count()
            )));
        }

        if !(self.cursor.step.is_finite() && self.cursor.step > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "[cursor] step must be positive, got {}",
                self.cursor.step
            )));
        }
        if self.history.max_history_length == 0 {
            return Err(ConfigError::ValidationError(
                "[history] max_history_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<LogicConfig, ConfigError> {
    let config = LogicConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML string (for testing).
pub fn load_config_from_str(content: &str) -> Result<LogicConfig, ConfigError> {
    let config = LogicConfig::from_toml_str(content)?;
    config.validate()?;
    Ok(config)
}
