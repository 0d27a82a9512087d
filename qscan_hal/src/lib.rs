//! # qscan HAL Library
//!
//! Interfuse layer between the scan logic and the hardware collaborators.
//!
//! # Module Structure
//!
//! - [`units`] - Position/voltage conversion
//! - [`interfuse`] - `ScannerInterfuse`: task lifecycle and scan-line execution
//! - [`backend_registry`] - Backend factory registration
//! - [`drivers`] - Backend implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          qscan_hal                               │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌────────────────┐  │
//! │  │ UnitConverter│◄───│ ScannerInterfuse │◄───│ BackendRegistry│  │
//! │  └──────────────┘    │   (TaskTable)    │    └────────────────┘  │
//! │                      └────┬────────┬────┘                        │
//! │                           ▼        ▼                             │
//! │                  ┌───────────┐ ┌───────────────┐                 │
//! │                  │ DaqDevice │ │ PhotonCounter │ (trait objects) │
//! │                  └───────────┘ └───────────────┘                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod backend_registry;
pub mod drivers;
pub mod interfuse;
pub mod units;

pub use crate::backend_registry::BackendRegistry;
pub use crate::interfuse::ScannerInterfuse;
pub use crate::units::UnitConverter;
