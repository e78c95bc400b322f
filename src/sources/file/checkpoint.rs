// SPDX-License-Identifier: Apache-2.0

//! Checkpoint values and the shared store the controller publishes them to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::sources::file::error::{Error, Result};

/// Persisted key holding the byte offset as a decimal string
pub const FILE_POINTER_KEY: &str = "file.pointer";
/// Persisted key holding the tailed file path, absent when nothing is tailed
pub const TAILED_FILE_KEY: &str = "tailed.file";

/// Flat key/value form handed to the host
pub type CheckpointState = BTreeMap<String, String>;

/// Position from which ingestion resumes after a restart.
///
/// `offset` only has meaning relative to `tailed_file`. Without a tailed file the
/// offset is 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub offset: u64,
    pub tailed_file: Option<PathBuf>,
}

impl Checkpoint {
    pub fn new(offset: u64, tailed_file: Option<PathBuf>) -> Self {
        Self {
            offset,
            tailed_file,
        }
    }

    pub fn to_state(&self) -> CheckpointState {
        let mut state = CheckpointState::new();
        state.insert(FILE_POINTER_KEY.to_string(), self.offset.to_string());
        if let Some(tailed) = &self.tailed_file {
            state.insert(
                TAILED_FILE_KEY.to_string(),
                tailed.to_string_lossy().into_owned(),
            );
        }
        state
    }

    /// Parse a persisted map. An empty map is the initial checkpoint.
    pub fn from_state(state: &CheckpointState) -> Result<Self> {
        if let Some(key) = state
            .keys()
            .find(|k| k.as_str() != FILE_POINTER_KEY && k.as_str() != TAILED_FILE_KEY)
        {
            return Err(Error::InvalidCheckpoint(format!("unexpected key '{}'", key)));
        }

        let offset = match state.get(FILE_POINTER_KEY) {
            Some(v) => v.parse::<u64>().map_err(|e| {
                Error::InvalidCheckpoint(format!(
                    "'{}' value '{}' is not an offset: {}",
                    FILE_POINTER_KEY, v, e
                ))
            })?,
            None => 0,
        };

        let tailed_file = match state.get(TAILED_FILE_KEY) {
            Some(v) if v.is_empty() => {
                return Err(Error::InvalidCheckpoint(format!(
                    "'{}' must not be empty",
                    TAILED_FILE_KEY
                )));
            }
            Some(v) => Some(PathBuf::from(v)),
            None => None,
        };

        if tailed_file.is_none() && offset != 0 {
            return Err(Error::InvalidCheckpoint(format!(
                "'{}' is {} but no '{}' is recorded",
                FILE_POINTER_KEY, offset, TAILED_FILE_KEY
            )));
        }

        Ok(Self {
            offset,
            tailed_file,
        })
    }
}

/// Thread-safe holder of the latest published checkpoint.
///
/// The controller commits after every delivered record. Snapshots may be taken
/// from any thread and always see an offset together with the file it belongs to.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    inner: Arc<Mutex<Checkpoint>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn restore(&self, checkpoint: Checkpoint) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = checkpoint;
    }

    pub fn commit(&self, offset: u64, tailed_file: Option<&Path>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.offset = offset;
        guard.tailed_file = tailed_file.map(Path::to_path_buf);
    }

    pub fn reset(&self) {
        self.restore(Checkpoint::default());
    }
}
