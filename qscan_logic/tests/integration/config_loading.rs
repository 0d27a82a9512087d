//! The shipped configuration file, end to end through the backend registry.

use super::TIMEOUT;
use qscan_common::config::{ConfigError, LogLevel};
use qscan_hal::{BackendRegistry, ScannerInterfuse};
use qscan_logic::ScanLoopController;
use qscan_logic::config::{load_config, load_config_from_str};
use qscan_logic::confocal::LoggingConfocal;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn sample_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/config/qscan.toml"))
}

#[test]
fn sample_config_is_valid() {
    let config = load_config(sample_path()).unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert_eq!(config.backend, "simulation");
    assert_eq!(config.scanner.axis_count(), 4);

    let session = config.session();
    assert_eq!(session.scan_axis, 3);
    // 400 samples over 40000 units at 20000 units/s
    assert!((session.clock_frequency - 200.0).abs() < 1e-9);
    assert!(config.backend_table("simulation").is_some());
}

#[test]
fn sample_config_runs_a_scan() {
    let mut config = load_config(sample_path()).unwrap();
    config.scan.number_of_repeats = 2;

    let registry = BackendRegistry::with_builtin();
    let backend = registry
        .create(&config.backend, config.backend_table(&config.backend))
        .unwrap();
    let interfuse =
        ScannerInterfuse::new(config.scanner.clone(), config.tagger.clone(), backend).unwrap();
    let controller = ScanLoopController::new(
        interfuse,
        config.session(),
        config.cursor.to_controller_settings(),
        Some(Box::new(LoggingConfocal::new(config.confocal))),
    )
    .unwrap();

    controller.start_scanning().unwrap();
    assert!(controller.wait_until_idle(TIMEOUT));
    assert_eq!(controller.lines_completed(), 2);
    // the line sits at 0 V, the middle of the ramp
    let (sample, _) = controller.data().peak().unwrap();
    assert!(sample.abs_diff(200) <= 2, "peak at {sample}");
}

#[test]
fn unknown_backend_is_reported() {
    let config = load_config(sample_path()).unwrap();
    let registry = BackendRegistry::with_builtin();
    assert!(registry.create("nidaq", config.backend_table("nidaq")).is_err());
}

#[test]
fn missing_and_broken_files() {
    assert!(matches!(
        load_config(Path::new("/nonexistent/qscan.toml")),
        Err(ConfigError::FileNotFound(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[shared]\nservice_name = \"x\"\n[scanner]\nao_channels = 3").unwrap();
    assert!(matches!(
        load_config(file.path()),
        Err(ConfigError::ParseError(_))
    ));

    let content = std::fs::read_to_string(sample_path())
        .unwrap()
        .replace("scan_axis = 3", "scan_axis = 4");
    assert!(matches!(
        load_config_from_str(&content),
        Err(ConfigError::ValidationError(_))
    ));
}
