//! qscan Common Library
//!
//! Shared types, hardware contracts and configuration loading for the qscan
//! workspace (laser-scanning acquisition).
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide constants and defaults
//! - [`hal`] - Hardware collaborator contracts (DAQ card, photon counter)
//! - [`scanner`] - Scan session, scan state and scan error types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use qscan_common::prelude::*;
//! use qscan_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
pub mod scanner;
