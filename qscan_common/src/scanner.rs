//! Scan-level shared types.
//!
//! Used by both the interfuse layer (`qscan_hal`) and the scan logic
//! (`qscan_logic`).

pub mod error;
pub mod session;
pub mod state;
