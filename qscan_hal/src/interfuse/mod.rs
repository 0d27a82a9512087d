//! Scanner interfuse: one DAQ card and one photon counter driven as a single
//! confocal/laser scanner device.
//!
//! - [`tasks`] - per-kind task slots and their lifecycle
//! - [`scanner`] - `ScannerInterfuse`, the owner of all hardware tasks

pub mod scanner;
pub mod tasks;

pub use scanner::ScannerInterfuse;
pub use tasks::TaskTable;
