//! Scan loop transitions.
//!
//! ```text
//!        Start / Continue            Stop / RepeatsComplete / Fault
//!  Idle ─────────────────► Running ──────────────────────────────► StopRequested
//!   ▲                                                                    │
//!   └──────────────────────────── TeardownComplete ──────────────────────┘
//! ```
//!
//! Only the worker executing a scheduled line fires `TeardownComplete`, so
//! every running period ends with exactly one teardown.

use qscan_common::scanner::state::ScanState;

/// Result of a scan state transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, new state.
    Ok(ScanState),
    /// Transition rejected, reason.
    Rejected(&'static str),
}

impl TransitionResult {
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Event that can move the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// Fresh scan requested.
    Start,
    /// Resume a stopped scan without clearing its data.
    Continue,
    /// User stop.
    Stop,
    /// Line counter reached the repeat count.
    RepeatsComplete,
    /// Hardware could not be armed for the scan.
    Fault,
    /// Worker closed all tasks.
    TeardownComplete,
}

/// Scan loop state holder.
#[derive(Debug, Clone, Default)]
pub struct ScanStateMachine {
    state: ScanState,
}

impl ScanStateMachine {
    /// New machine in `Idle`.
    pub const fn new() -> Self {
        Self {
            state: ScanState::Idle,
        }
    }

    #[inline]
    pub const fn state(&self) -> ScanState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: LoopEvent) -> TransitionResult {
        use LoopEvent::*;
        use ScanState::*;

        let next = match (self.state, event) {
            (Idle, Start | Continue) => Running,
            (Running, Stop | RepeatsComplete | Fault) => StopRequested,
            // a second stop while teardown is pending changes nothing
            (StopRequested, Stop | RepeatsComplete | Fault) => StopRequested,
            (StopRequested, TeardownComplete) => Idle,
            _ => {
                return TransitionResult::Rejected(invalid_transition_reason(self.state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Force `Idle` on shutdown, when no worker is left to tear down.
    #[inline]
    pub fn force_idle(&mut self) {
        self.state = ScanState::Idle;
    }

    /// Whether `start`/`continue` may be accepted.
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, ScanState::Idle)
    }
}

fn invalid_transition_reason(state: ScanState, event: LoopEvent) -> &'static str {
    use LoopEvent::*;
    use ScanState::*;
    match (state, event) {
        (Idle, TeardownComplete) => "Idle: nothing to tear down",
        (Idle, _) => "Idle: scan not running",
        (Running, Start | Continue) => "Running: scan already running",
        (Running, _) => "Running: teardown requires a stop request first",
        (StopRequested, _) => "StopRequested: waiting for teardown",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use LoopEvent::*;
    use ScanState::*;

    #[test]
    fn initial_state_is_idle() {
        let sm = ScanStateMachine::new();
        assert_eq!(sm.state(), Idle);
        assert!(sm.is_idle());
    }

    #[test]
    fn full_cycle() {
        let mut sm = ScanStateMachine::new();
        assert_eq!(sm.handle_event(Start), TransitionResult::Ok(Running));
        assert_eq!(sm.handle_event(Stop), TransitionResult::Ok(StopRequested));
        assert_eq!(sm.handle_event(TeardownComplete), TransitionResult::Ok(Idle));
        assert_eq!(sm.handle_event(Continue), TransitionResult::Ok(Running));
        assert_eq!(
            sm.handle_event(RepeatsComplete),
            TransitionResult::Ok(StopRequested)
        );
    }

    #[test]
    fn double_start_is_rejected() {
        let mut sm = ScanStateMachine::new();
        sm.handle_event(Start);
        assert!(matches!(sm.handle_event(Start), TransitionResult::Rejected(_)));
        assert!(matches!(sm.handle_event(Continue), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), Running);
    }

    #[test]
    fn teardown_only_after_stop_request() {
        let mut sm = ScanStateMachine::new();
        assert!(!sm.handle_event(TeardownComplete).is_ok());
        sm.handle_event(Start);
        assert!(!sm.handle_event(TeardownComplete).is_ok());
        assert_eq!(sm.state(), Running);
    }

    #[test]
    fn repeated_stop_is_idempotent() {
        let mut sm = ScanStateMachine::new();
        sm.handle_event(Start);
        sm.handle_event(Fault);
        assert_eq!(sm.handle_event(Stop), TransitionResult::Ok(StopRequested));
        assert!(matches!(sm.handle_event(Start), TransitionResult::Rejected(_)));
    }

    #[test]
    fn stop_from_idle_is_rejected() {
        let mut sm = ScanStateMachine::new();
        assert_eq!(
            sm.handle_event(Stop),
            TransitionResult::Rejected("Idle: scan not running")
        );
    }

    #[test]
    fn force_idle_resets() {
        let mut sm = ScanStateMachine::new();
        sm.handle_event(Start);
        sm.force_idle();
        assert!(sm.is_idle());
    }
}
