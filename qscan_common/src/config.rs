//! Configuration loading traits and types.
//!
//! Every qscan binary reads a single TOML file. The `[shared]` table is
//! common to all of them; the hardware tables come from
//! [`crate::hal::config`] and the session from [`crate::scanner::session`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use qscan_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use qscan_common::hal::config::ScannerConfig;
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct ScannerFile {
//!     shared: SharedConfig,
//!     scanner: ScannerConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let file = ScannerFile::load(Path::new("qscan.toml"))?;
//!     println!("{} drives {} axes", file.shared.service_name, file.scanner.axis_count());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No configuration file at the path.
    #[error("Configuration file {0:?} not found")]
    FileNotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("Failed to read configuration: {0}")]
    ReadError(String),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all qscan applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "laser-scanner-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files and strings.
///
/// Blanket-implemented for every `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ReadError` for any other I/O failure
/// - `ConfigError::ParseError` for invalid TOML or a table of the wrong shape
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::ReadError(format!("{}: {e}", path.display())),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from an in-memory TOML document.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::config::ScannerConfig;
    use crate::scanner::session::ScanSession;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct ScannerFile {
        shared: SharedConfig,
        scanner: ScannerConfig,
        scan: ScanSession,
    }

    const SCANNER_FILE: &str = r#"
[shared]
log_level = "debug"
service_name = "laser-scanner"

[scanner]
ao_channels = ["/Dev1/AO0", "/Dev1/AO1", "/Dev1/AO2", "/Dev1/AO3"]
voltage_ranges = [[-10.0, 10.0], [-10.0, 10.0], [-10.0, 10.0], [-4.0, 4.0]]
position_ranges = [[0.0, 1e-4], [0.0, 1e-4], [-1e-5, 1e-5], [-40000.0, 40000.0]]
clock_channel = "/Dev1/Ctr2"

[scan]
scan_axis = 3
scan_range = [-20000.0, 20000.0]
resolution = 400
scan_speed = 20000.0
clock_frequency = 200.0
number_of_repeats = 10
"#;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn log_levels_map_to_filter_directives() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }

        assert_eq!(LogLevel::default(), LogLevel::Info);
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            let text = level.as_directive();
            let parsed = toml::from_str::<Wrapper>(&format!("level = \"{text}\"")).unwrap();
            assert_eq!(parsed.level, level);
        }
    }

    #[test]
    fn blank_service_name_is_rejected() {
        let mut shared = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "laser-scanner".to_string(),
        };
        assert!(shared.validate().is_ok());

        shared.service_name = "   ".to_string();
        assert!(matches!(
            shared.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn scanner_file_loads_every_table() {
        let file = write_file(SCANNER_FILE);
        let loaded = ScannerFile::load(file.path()).unwrap();

        assert_eq!(loaded.shared.log_level, LogLevel::Debug);
        assert_eq!(loaded.scanner.axis_count(), 4);
        assert!(loaded.scanner.validate().is_ok());
        assert_eq!(loaded.scan.scan_axis, 3);
        assert_eq!(loaded.scan.number_of_repeats, 10);
        // serde defaults of the session
        assert!(loaded.scan.retrace);
        assert!(!loaded.scan.custom_scan);
        assert!(loaded.scan.validate().is_ok());
    }

    #[test]
    fn missing_file_names_its_path() {
        let path = Path::new("/nonexistent/qscan/qscan.toml");
        match ScannerFile::load(path) {
            Err(ConfigError::FileNotFound(missing)) => assert_eq!(missing, path),
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn directory_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ScannerFile::load(dir.path()),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn malformed_tables_are_parse_errors() {
        let broken = write_file("[scanner\nao_channels = [");
        assert!(matches!(
            ScannerFile::load(broken.path()),
            Err(ConfigError::ParseError(_))
        ));

        // well-formed TOML, but the scan table lacks its range
        let incomplete = SCANNER_FILE.replace("scan_range = [-20000.0, 20000.0]\n", "");
        assert!(matches!(
            ScannerFile::from_toml_str(&incomplete),
            Err(ConfigError::ParseError(_))
        ));

        let wrong_type = SCANNER_FILE.replace("resolution = 400", "resolution = \"400\"");
        assert!(matches!(
            ScannerFile::from_toml_str(&wrong_type),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn log_level_defaults_to_info() {
        let content = SCANNER_FILE.replace("log_level = \"debug\"\n", "");
        let loaded = ScannerFile::from_toml_str(&content).unwrap();
        assert_eq!(loaded.shared.log_level, LogLevel::Info);
    }
}
