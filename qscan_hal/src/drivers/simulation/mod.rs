//! Simulation backend.
//!
//! A simulated DAQ card and a simulated photon counter sharing one optical
//! bench. When a finite clock task starts, the bench plays the clocked
//! analog-output buffer through a spectral model and fills every running
//! count-between-markers measurement, one bin per pixel.
//!
//! # Configuration
//!
//! ```toml
//! [backends.simulation]
//! realtime = false
//! signal_axis = 3
//!
//! [backends.simulation.spectrum]
//! background_rate = 2000.0
//! lines = [{ center_voltage = 0.0, peak_rate = 50000.0, width_voltage = 0.2 }]
//! ```

mod bench;
mod daq;
mod spectrum;
mod tagger;

pub use bench::SimulationHandle;
pub use daq::SimDaq;
pub use spectrum::{SpectralLine, SpectrumModel};
pub use tagger::{SimMeasurement, SimTagger};

use bench::BenchState;
use parking_lot::Mutex;
use qscan_common::hal::driver::{HalError, HardwareBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "simulation";

/// Simulation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Sleep for the simulated duration of each line.
    pub realtime: bool,
    /// Analog-output row whose voltage drives the spectrum; the last row if unset.
    pub signal_axis: Option<usize>,
    /// Spectral model seen by the detector.
    pub spectrum: SpectrumModel,
}

/// Create a simulated backend together with a handle for inspecting and
/// perturbing it.
pub fn create(config: SimulationConfig) -> (HardwareBackend, SimulationHandle) {
    let bench = Arc::new(Mutex::new(BenchState::new(config)));
    let backend = HardwareBackend {
        daq: Box::new(SimDaq::new(Arc::clone(&bench))),
        counter: Box::new(SimTagger::new(Arc::clone(&bench))),
    };
    (backend, SimulationHandle::new(bench))
}

/// Registry factory.
pub fn create_backend(config: Option<&toml::Value>) -> Result<HardwareBackend, HalError> {
    let config = config
        .map(|value| value.clone().try_into::<SimulationConfig>())
        .transpose()
        .map_err(|e| HalError::ConfigError(format!("simulation backend: {e}")))?
        .unwrap_or_default();
    Ok(create(config).0)
}
