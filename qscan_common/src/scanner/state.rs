//! Scan loop state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the scan loop.
///
/// `Idle -> Running -> StopRequested -> Idle`. Every `Running` period ends
/// with exactly one teardown, performed by the line that observes
/// `StopRequested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanState {
    /// No scan session; hardware tasks closed.
    #[default]
    Idle,
    /// Lines are being acquired.
    Running,
    /// Stop requested; the next scheduled line tears down.
    StopRequested,
}

impl ScanState {
    /// True while a hardware session is live.
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, ScanState::Running | ScanState::StopRequested)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::StopRequested => "stop-requested",
        };
        f.write_str(name)
    }
}
