// SPDX-License-Identifier: Apache-2.0

//! Polling directory walker.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use super::traits::{DirectoryWalker, FileEvent, WalkerError};

/// File metadata for change detection
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    /// Last modification time
    modified: Option<SystemTime>,
    /// File size in bytes
    size: u64,
}

impl FileState {
    fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

/// Lists the root on every scan and diffs it against the previous listing.
///
/// Only regular files directly under the root are reported. Subdirectories and
/// hidden files are ignored.
pub struct PollWalker {
    root: PathBuf,
    /// Known file states from last scan
    file_states: HashMap<PathBuf, FileState>,
}

impl PollWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_states: HashMap::new(),
        }
    }

    fn list_files(&self) -> Result<BTreeMap<PathBuf, FileState>, WalkerError> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| WalkerError::Unreachable(self.root.clone(), e))?;

        let mut files = BTreeMap::new();
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            // Only track regular files
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            files.insert(entry.path(), FileState::from_metadata(&metadata));
        }
        Ok(files)
    }
}

impl DirectoryWalker for PollWalker {
    fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&mut self) -> Result<Vec<FileEvent>, WalkerError> {
        let current = self.list_files()?;
        let mut events = Vec::new();

        // BTreeMap iteration keeps events in name order
        for (path, state) in &current {
            match self.file_states.get(path) {
                None => events.push(FileEvent::create(path.clone())),
                Some(old) if old != state => events.push(FileEvent::modify(path.clone())),
                Some(_) => {}
            }
        }

        let removed: BTreeSet<PathBuf> = self
            .file_states
            .keys()
            .filter(|p| !current.contains_key(*p))
            .cloned()
            .collect();
        events.extend(removed.into_iter().map(FileEvent::remove));

        self.file_states = current.into_iter().collect();

        if !events.is_empty() {
            debug!(root = ?self.root, events = events.len(), "Directory scan found changes");
        }
        Ok(events)
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::FileEventKind;
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_first_scan_reports_existing_files_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["b.log", "a.log", "c.log"] {
            File::create(temp_dir.path().join(name)).unwrap();
        }
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        File::create(temp_dir.path().join(".hidden")).unwrap();

        let mut walker = PollWalker::new(temp_dir.path());
        let events = walker.scan().unwrap();

        let names: Vec<_> = events
            .iter()
            .map(|e| {
                assert_eq!(e.kind, FileEventKind::Create);
                e.path.file_name().unwrap().to_string_lossy().into_owned()
            })
            .collect();
        assert_eq!(names, vec!["a.log", "b.log", "c.log"]);

        assert!(walker.scan().unwrap().is_empty());
    }

    #[test]
    fn test_detects_modify() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.log");
        File::create(&file_path).unwrap();

        let mut walker = PollWalker::new(temp_dir.path());
        walker.scan().unwrap();

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .unwrap();
        file.write_all(b"more content\n").unwrap();

        let events = walker.scan().unwrap();
        assert_eq!(events, vec![FileEvent::modify(file_path)]);
    }

    #[test]
    fn test_detects_remove() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.log");
        File::create(&file_path).unwrap();

        let mut walker = PollWalker::new(temp_dir.path());
        walker.scan().unwrap();
        fs::remove_file(&file_path).unwrap();

        let events = walker.scan().unwrap();
        assert_eq!(events, vec![FileEvent::remove(file_path)]);
    }

    #[test]
    fn test_missing_root_is_unreachable() {
        let temp_dir = TempDir::new().unwrap();
        let mut walker = PollWalker::new(temp_dir.path().join("missing"));

        assert!(matches!(
            walker.scan(),
            Err(WalkerError::Unreachable(_, _))
        ));
        assert_eq!(walker.backend_name(), "poll");
    }
}
