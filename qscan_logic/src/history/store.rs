//! History persistence.
//!
//! Entries are stored with bincode, keyed by index with 0 the newest, behind
//! a format version and a save timestamp. Files of another version or that
//! fail to decode are treated as no history.

use crate::history::HistoryEntry;
use qscan_common::hal::driver::HalError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// On-disk layout of the history file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistedHistory {
    /// Format version (for migration)
    pub version: u32,
    /// Entries keyed by age, 0 = newest
    pub entries: BTreeMap<u32, HistoryEntry>,
    /// Unix epoch seconds of the last save
    pub saved_at: u64,
}

impl PersistedHistory {
    pub const CURRENT_VERSION: u32 = 2;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: BTreeMap::new(),
            saved_at: 0,
        }
    }
}

/// History file manager.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entries`, given oldest first.
    pub fn save<'a>(
        &self,
        entries: impl DoubleEndedIterator<Item = &'a HistoryEntry>,
    ) -> Result<(), HalError> {
        debug!("Saving history to {:?}", self.path);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                HalError::PersistenceError(format!("Failed to create directory: {}", e))
            })?;
        }

        let mut history = PersistedHistory::new();
        for (age, entry) in entries.rev().enumerate() {
            let key = u32::try_from(age).map_err(|_| {
                HalError::PersistenceError("Too many history entries".to_string())
            })?;
            history.entries.insert(key, entry.clone());
        }
        history.saved_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let file = File::create(&self.path).map_err(|e| {
            HalError::PersistenceError(format!("Failed to create history file: {}", e))
        })?;
        bincode::serialize_into(BufWriter::new(file), &history).map_err(|e| {
            HalError::PersistenceError(format!("Failed to serialize history: {}", e))
        })?;

        info!(
            "Saved {} history entries to {:?}",
            history.entries.len(),
            self.path
        );
        Ok(())
    }

    /// Stored entries, newest first. `None` when there is no usable file.
    pub fn load(&self) -> Result<Option<Vec<HistoryEntry>>, HalError> {
        debug!("Loading history from {:?}", self.path);

        if !self.path.exists() {
            debug!("History file does not exist, starting fresh");
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|e| {
            HalError::PersistenceError(format!("Failed to open history file: {}", e))
        })?;
        let history: PersistedHistory = match bincode::deserialize_from(BufReader::new(file)) {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to deserialize history file, starting fresh: {}", e);
                return Ok(None);
            }
        };

        if history.version != PersistedHistory::CURRENT_VERSION {
            warn!(
                "History file version {} differs from current {}, starting fresh",
                history.version,
                PersistedHistory::CURRENT_VERSION
            );
            return Ok(None);
        }

        info!(
            "Loaded {} history entries from {:?} (saved at {})",
            history.entries.len(),
            self.path,
            history.saved_at
        );
        Ok(Some(history.entries.into_values().collect()))
    }

    pub fn delete(&self) -> Result<(), HalError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                HalError::PersistenceError(format!("Failed to delete history file: {}", e))
            })?;
            info!("Deleted history file {:?}", self.path);
        }
        Ok(())
    }
}
