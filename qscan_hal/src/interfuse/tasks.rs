//! Arena of hardware task slots, one per [`TaskKind`].
//!
//! Lifecycle per slot: `Closed -> Created -> Configured -> Running -> Stopped -> Closed`.
//! A stopped task may be reconfigured or restarted; stopping an idle task is a
//! no-op. Creating a kind that is already open is an error.

use qscan_common::hal::types::{TaskHandle, TaskKind, TaskState};
use qscan_common::scanner::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TaskSlot {
    handle: TaskHandle,
    state: TaskState,
}

/// At most one open task of each kind.
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    slots: [Option<TaskSlot>; 4],
}

impl TaskTable {
    /// Empty table, every kind closed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created task.
    ///
    /// # Errors
    /// `ScanError::Configuration` if a task of this kind is still open.
    pub fn insert(&mut self, kind: TaskKind, handle: TaskHandle) -> Result<(), ScanError> {
        let slot = &mut self.slots[kind.index()];
        if let Some(open) = slot {
            return Err(ScanError::Configuration(format!(
                "{kind} task {} is still open; close it first",
                open.handle
            )));
        }
        *slot = Some(TaskSlot {
            handle,
            state: TaskState::Created,
        });
        Ok(())
    }

    /// Handle of the open task of `kind`, if any.
    pub fn handle(&self, kind: TaskKind) -> Option<TaskHandle> {
        self.slots[kind.index()].map(|slot| slot.handle)
    }

    /// Handle of the open task of `kind`.
    ///
    /// # Errors
    /// `ScanError::Configuration` if none is open.
    pub fn require(&self, kind: TaskKind) -> Result<TaskHandle, ScanError> {
        self.handle(kind)
            .ok_or_else(|| ScanError::Configuration(format!("no {kind} task open")))
    }

    /// Current state; `Closed` for an empty slot.
    pub fn state(&self, kind: TaskKind) -> TaskState {
        self.slots[kind.index()].map_or(TaskState::Closed, |slot| slot.state)
    }

    /// Move the open task of `kind` to `next`.
    ///
    /// # Errors
    /// `ScanError::Configuration` if no task is open or the step is illegal.
    pub fn transition(&mut self, kind: TaskKind, next: TaskState) -> Result<(), ScanError> {
        let Some(slot) = self.slots[kind.index()].as_mut() else {
            return Err(ScanError::Configuration(format!("no {kind} task open")));
        };
        if !allowed(slot.state, next) {
            return Err(ScanError::Configuration(format!(
                "{kind} task cannot go from {:?} to {next:?}",
                slot.state
            )));
        }
        slot.state = next;
        Ok(())
    }

    /// Take the task of `kind` out of the table, marking the slot closed.
    pub fn remove(&mut self, kind: TaskKind) -> Option<TaskHandle> {
        self.slots[kind.index()].take().map(|slot| slot.handle)
    }

    /// State of every kind.
    pub fn states(&self) -> Vec<(TaskKind, TaskState)> {
        TaskKind::ALL
            .iter()
            .map(|&kind| (kind, self.state(kind)))
            .collect()
    }

    /// True when no task is open.
    pub fn all_closed(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

fn allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Created | Configured | Stopped, Configured)
            | (Created | Configured | Stopped | Running, Running)
            | (_, Stopped)
    ) && from != Closed
        && to != Closed
        && to != Created
}
