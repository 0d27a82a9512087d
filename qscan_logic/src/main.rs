//! # qscan
//!
//! Runs one laser scan with the configured session, pushes the result into
//! the scan history and saves it.
//!
//! # Usage
//!
//! ```bash
//! # Simulated scanner
//! qscan --config config/qscan.toml
//!
//! # Override the repeat count, verbose JSON logs
//! qscan --config config/qscan.toml --repeats 20 -v --json
//! ```

use clap::Parser;
use qscan_common::config::LogLevel;
use qscan_common::consts::DEFAULT_CONFIG_PATH;
use qscan_common::scanner::error::ScanError;
use qscan_logic::config::{LogicConfig, load_config};
use qscan_logic::confocal::LoggingConfocal;
use qscan_logic::events::ScanEvent;
use qscan_logic::{HistoryManager, HistoryStore, RampGenerator, ScanLoopController};
use qscan_hal::{BackendRegistry, ScannerInterfuse};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// qscan - laser scan acquisition
#[derive(Parser, Debug)]
#[command(name = "qscan")]
#[command(version)]
#[command(about = "Scan-line acquisition for laser-scanning microscopy")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Hardware backend, overriding the configured one
    #[arg(short, long)]
    backend: Option<String>,

    /// Number of lines to acquire, overriding the configured session
    #[arg(short, long)]
    repeats: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("qscan failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_config(&args.config);
    setup_tracing(&args, loaded.as_ref().ok().map(|c| c.shared.log_level));
    let mut config = loaded?;

    info!(
        "qscan v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    if let Some(repeats) = args.repeats {
        config.scan.number_of_repeats = repeats;
    }
    let backend_name = args.backend.clone().unwrap_or_else(|| config.backend.clone());

    let registry = BackendRegistry::with_builtin();
    debug!("Available backends: {:?}", registry.list());
    let backend = registry.create(&backend_name, config.backend_table(&backend_name))?;
    info!("Backend '{}' created", backend_name);

    let interfuse = ScannerInterfuse::new(config.scanner.clone(), config.tagger.clone(), backend)?;
    let confocal = LoggingConfocal::new(config.confocal);
    let session = config.session();
    let mut controller = ScanLoopController::new(
        interfuse,
        session.clone(),
        config.cursor.to_controller_settings(),
        Some(Box::new(confocal)),
    )?;

    let store = config.history.state_file.as_ref().map(HistoryStore::new);
    let mut history = match &store {
        Some(store) => HistoryManager::load(store, config.history.max_history_length)?,
        None => HistoryManager::new(config.history.max_history_length),
    };
    let resume = !history.is_empty() && history.resume_latest(&controller, session)?;

    let handle = controller.handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handle.stop_scanning();
    })?;

    let events = controller.subscribe();
    if resume {
        controller.continue_scanning()?;
    } else {
        controller.start_scanning()?;
    }
    while let Ok(event) = events.recv() {
        match event {
            ScanEvent::ScanStarted {
                repeats,
                line_length,
                ..
            } => info!("Scanning {} lines of {} samples", repeats, line_length),
            ScanEvent::ScanDataUpdated {
                row,
                lines_completed,
            } => debug!("Line {} done ({} total)", row, lines_completed),
            ScanEvent::LineFailed { failed_lines } => {
                warn!("{} lines failed so far", failed_lines)
            }
            ScanEvent::HardwareError(message) => warn!("Hardware error: {}", message),
            ScanEvent::ScanFinished { lines_completed } => {
                info!("Scan finished with {} lines", lines_completed);
                break;
            }
            _ => {}
        }
    }
    if !controller.wait_until_idle(Duration::from_secs(5)) {
        warn!("Scan loop still busy after finishing");
    }

    history.record(&controller);
    if let Some(store) = &store {
        history.save(store)?;
    }
    report(&config, &controller)?;

    controller.shutdown();
    info!("qscan shutdown complete");
    Ok(())
}

/// Log where the mean count rate peaked.
fn report(config: &LogicConfig, controller: &ScanLoopController) -> Result<(), ScanError> {
    let data = controller.data();
    let failed = controller.failed_lines();
    let Some((sample, rate)) = data.peak() else {
        warn!("No line acquired ({} failed)", failed);
        return Ok(());
    };
    let session = controller.session();
    let (start, end) = session.scan_range;
    let ramp = RampGenerator::from_session(&session).generate(start, end)?;
    let axis = config
        .scanner
        .ao_channels
        .get(session.scan_axis)
        .map_or("?", String::as_str);
    info!(
        "Peak of {:.1} counts/s at {:.4} on {} ({} lines, {} failed)",
        rate,
        ramp.as_slice().get(sample).copied().unwrap_or(f64::NAN),
        axis,
        data.rows_written(),
        failed
    );
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: Option<LogLevel>) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured
            .and_then(|level| level.as_directive().parse().ok())
            .unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
