//! State machine module root.
//!
//! The scan loop has a single level: `Idle -> Running -> StopRequested -> Idle`.

pub mod machine;

pub use machine::{LoopEvent, ScanStateMachine, TransitionResult};
