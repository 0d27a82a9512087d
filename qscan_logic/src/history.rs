//! Scan history: bounded list of snapshots of the controller.
//!
//! Entries are kept in insertion order, index 0 being the oldest. Pushing
//! past `max_length` evicts from the front. Navigating back with
//! [`HistoryManager::pop_to`] drops every newer entry.

pub mod store;

use crate::controller::{ScanData, ScanLoopController};
use qscan_common::hal::driver::HalError;
use qscan_common::scanner::error::ScanError;
use qscan_common::scanner::session::ScanSession;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub use store::HistoryStore;

/// Immutable snapshot of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session: ScanSession,
    pub data: ScanData,
    /// Scanner position per axis.
    pub position: Vec<f64>,
    /// Last confocal spot moved to by the scan, if any.
    pub confocal_position: Option<(f64, f64, f64)>,
    pub cursor_position: f64,
    pub lines_completed: usize,
    pub continuable: bool,
}

/// Bounded, ordered scan history.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    max_length: usize,
}

impl HistoryManager {
    /// Empty history holding at most `max_length` entries (at least one).
    pub fn new(max_length: usize) -> Self {
        let max_length = max_length.max(1);
        Self {
            entries: VecDeque::with_capacity(max_length),
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `entry`; returns the evicted oldest entry, if any.
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.entries.push_back(entry);
        if self.entries.len() > self.max_length {
            debug!("History full, oldest entry evicted");
            return self.entries.pop_front();
        }
        None
    }

    /// Entry at `index`, dropping every newer one.
    pub fn pop_to(&mut self, index: usize) -> Option<HistoryEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.entries.truncate(index + 1);
        self.entries.back().cloned()
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    /// Newest entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    // ─── Controller ─────────────────────────────────────────────────

    /// Deep copy of the controller state; works while scanning.
    pub fn snapshot(controller: &ScanLoopController) -> HistoryEntry {
        controller.snapshot()
    }

    /// Load `entry` into an idle controller.
    pub fn restore(entry: &HistoryEntry, controller: &ScanLoopController) -> Result<(), ScanError> {
        controller.restore(entry)
    }

    /// Snapshot the controller and push the result.
    pub fn record(&mut self, controller: &ScanLoopController) -> Option<HistoryEntry> {
        self.push(Self::snapshot(controller))
    }

    /// Navigate back to `index` and restore it into `controller`.
    ///
    /// # Errors
    /// `ScanError::Restore` for an index outside the history, otherwise the
    /// errors of [`ScanLoopController::restore`]. The history is left
    /// untouched on failure.
    pub fn go_back(&mut self, index: usize, controller: &ScanLoopController) -> Result<(), ScanError> {
        let entry = self
            .get(index)
            .ok_or_else(|| ScanError::Restore(format!("no history entry {index}")))?;
        controller.restore(entry)?;
        self.pop_to(index);
        info!("History restored to entry {}", index);
        Ok(())
    }

    /// Restore the newest entry, then make `session` the live one.
    ///
    /// The entry's buffers survive only when its session equals `session`;
    /// otherwise only its positions carry over. Returns whether the live
    /// scan can be continued.
    ///
    /// # Errors
    /// The errors of [`ScanLoopController::configure`] for `session`. A
    /// stored entry that cannot be restored is logged and skipped.
    pub fn resume_latest(
        &self,
        controller: &ScanLoopController,
        session: ScanSession,
    ) -> Result<bool, ScanError> {
        let Some(latest) = self.latest() else {
            controller.configure(session)?;
            return Ok(false);
        };
        if let Err(e) = restore_reshaped(latest, controller) {
            warn!("Newest history entry not restored: {}", e);
            controller.configure(session)?;
            return Ok(false);
        }
        if latest.session != session {
            info!("Session changed since the newest history entry, its buffers are dropped");
            controller.configure(session)?;
            return Ok(false);
        }
        info!(
            "Resumed newest history entry ({} lines)",
            latest.lines_completed
        );
        Ok(controller.is_continuable())
    }

    // ─── Persistence ────────────────────────────────────────────────

    pub fn save(&self, store: &HistoryStore) -> Result<(), HalError> {
        store.save(self.entries.iter())
    }

    /// History from `store`, newest `max_length` entries; empty if none stored.
    pub fn load(store: &HistoryStore, max_length: usize) -> Result<Self, HalError> {
        let mut history = Self::new(max_length);
        if let Some(newest_first) = store.load()? {
            let kept = newest_first.into_iter().take(history.max_length);
            history.entries = kept.collect::<Vec<_>>().into_iter().rev().collect();
        }
        Ok(history)
    }
}

/// Restore `entry`, reshaping the buffers first when they differ.
fn restore_reshaped(entry: &HistoryEntry, controller: &ScanLoopController) -> Result<(), ScanError> {
    match controller.restore(entry) {
        Err(ScanError::Restore(reason)) => {
            debug!("Reinitializing buffers before restore: {}", reason);
            controller.initialize_data(&entry.session)?;
            controller.restore(entry)
        }
        other => other,
    }
}
