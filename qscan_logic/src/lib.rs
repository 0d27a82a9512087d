//! # qscan Logic Library
//!
//! Scan logic of a laser-scanning setup: smoothed ramps, the asynchronous
//! scan-line loop with start/stop/continue, the idle cursor loop, and the
//! bounded scan history.
//!
//! # Module Structure
//!
//! - [`ramp`] - Smoothed ramp generation
//! - [`state`] - Scan loop state machine
//! - [`controller`] - `ScanLoopController` and its worker thread
//! - [`events`] - Notifications for the GUI side
//! - [`confocal`] - Narrow interface to the confocal logic
//! - [`history`] - Snapshots, navigation and persistence
//! - [`config`] - TOML configuration of the `qscan` binary
//!
//! # Architecture
//!
//! ```text
//!   GUI / CLI ──commands──► ScanLoopController ──events──► subscribers
//!                                 │  (state lock)
//!                                 ▼ job queue (single consumer)
//!                           LineWorker thread
//!                       ┌─────────┴──────────┐
//!                 RampGenerator        ScannerInterfuse ──► DAQ + photon counter
//! ```

pub mod config;
pub mod confocal;
pub mod controller;
pub mod events;
pub mod history;
pub mod ramp;
pub mod state;

pub use controller::{ControllerSettings, ScanHandle, ScanLoopController};
pub use history::{HistoryEntry, HistoryManager, HistoryStore};
pub use ramp::{Ramp, RampGenerator};
