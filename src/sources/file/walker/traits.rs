// SPDX-License-Identifier: Apache-2.0

//! Traits and types for directory walkers.

use std::fmt;
use std::path::{Path, PathBuf};

/// Error type for walker operations
#[derive(Debug)]
pub enum WalkerError {
    /// The watch root could not be listed
    Unreachable(PathBuf, std::io::Error),
    /// IO error
    Io(std::io::Error),
}

impl fmt::Display for WalkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkerError::Unreachable(path, e) => {
                write!(f, "directory {:?} is unreachable: {}", path, e)
            }
            WalkerError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for WalkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalkerError::Unreachable(_, e) | WalkerError::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for WalkerError {
    fn from(e: std::io::Error) -> Self {
        WalkerError::Io(e)
    }
}

/// Kind of file event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File appeared in the directory
    Create,
    /// File content changed
    Modify,
    /// File is gone (deleted or moved away)
    Remove,
}

/// A change to a single file under the watch root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn create(path: PathBuf) -> Self {
        Self {
            kind: FileEventKind::Create,
            path,
        }
    }

    pub fn modify(path: PathBuf) -> Self {
        Self {
            kind: FileEventKind::Modify,
            path,
        }
    }

    pub fn remove(path: PathBuf) -> Self {
        Self {
            kind: FileEventKind::Remove,
            path,
        }
    }
}

/// Discovers files under a single root.
///
/// Each scan reports what changed since the previous scan. The first scan reports
/// every existing file as created. Events are ordered by file name.
pub trait DirectoryWalker: Send {
    fn root(&self) -> &Path;

    fn scan(&mut self) -> Result<Vec<FileEvent>, WalkerError>;

    /// Name of the walker backend for logging
    fn backend_name(&self) -> &'static str;
}
