// SPDX-License-Identifier: Apache-2.0

//! Ingestion state machine.
//!
//! The controller owns every live cursor and the identity of the tailed file. It
//! consumes walker events, reads files in name order, hands records to the
//! listener and publishes the tail position to the [`CheckpointStore`] after each
//! accepted record. It runs on a single worker thread, so emission and checkpoint
//! updates for a file are never concurrent.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bounded_channel::{BoundedReceiver, RecvTimeout};
use crate::sources::file::checkpoint::CheckpointStore;
use crate::sources::file::config::FileSourceConfig;
use crate::sources::file::cursor::{FileCursor, ReadOutcome};
use crate::sources::file::error::Error;
use crate::sources::file::framer::Framer;
use crate::sources::file::post_process::PostProcess;
use crate::sources::file::record::{Record, RecordListener};
use crate::sources::file::walker::{FileEvent, FileEventKind};

/// States of the ingestion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    DiscoverFile,
    OpenFile,
    EmitRecords,
    ContinueTail,
    FileComplete,
    PostProcess,
}

/// How a pass over a cursor ended
enum Drain {
    /// No further record is available right now
    Complete,
    /// Stopped early by pause, cancellation or a listener refusal
    Interrupted,
    /// Reading the file failed. The cursor is still positioned after the last
    /// delivered record.
    Failed,
}

pub struct IngestionController {
    config: FileSourceConfig,
    framer: Arc<Framer>,
    store: CheckpointStore,
    listener: Arc<dyn RecordListener>,
    post_processor: Arc<dyn PostProcess>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: ControllerState,
    /// Discovered files waiting to be read, in name order
    pending: BTreeSet<PathBuf>,
    /// Files fully read that stay in place (no action, or the action failed)
    processed: HashSet<PathBuf>,
    /// Non-tailed file whose ingestion was interrupted part way
    current: Option<FileCursor>,
    /// Non-tailed files whose reads failed, retried on later passes
    stalled: BTreeMap<PathBuf, FileCursor>,
    tail: Option<FileCursor>,
}

impl IngestionController {
    pub fn new(
        config: FileSourceConfig,
        framer: Arc<Framer>,
        store: CheckpointStore,
        listener: Arc<dyn RecordListener>,
        post_processor: Arc<dyn PostProcess>,
        paused: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            framer,
            store,
            listener,
            post_processor,
            paused,
            cancel,
            state: ControllerState::Idle,
            pending: BTreeSet::new(),
            processed: HashSet::new(),
            current: None,
            stalled: BTreeMap::new(),
            tail: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Path of the file currently being tailed
    pub fn tailed_file(&self) -> Option<&Path> {
        self.tail.as_ref().map(|c| c.path())
    }

    /// Worker loop. Returns once the cancellation token fires.
    pub fn run(mut self, events: BoundedReceiver<FileEvent>) {
        info!(
            source_id = %self.config.source_id,
            root = ?self.config.root,
            mode = %self.config.mode,
            tailing = self.config.tailing,
            "Ingestion worker started"
        );

        self.restore_tail();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.tick();

            match events.recv_timeout(self.config.tail_poll_interval) {
                RecvTimeout::Item(event) => {
                    self.handle_event(event);
                    while let Some(event) = events.try_recv() {
                        self.handle_event(event);
                    }
                }
                RecvTimeout::Timeout => {}
                RecvTimeout::Disconnected => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    // Discovery is gone, keep serving the tail
                    std::thread::sleep(self.config.tail_poll_interval);
                }
            }
        }

        self.set_state(ControllerState::Idle);
        info!(source_id = %self.config.source_id, "Ingestion worker stopped");
    }

    /// Resume the tailed file named by the restored checkpoint. A checkpoint that
    /// cannot be honoured is dropped and ingestion starts fresh.
    pub fn restore_tail(&mut self) {
        let checkpoint = self.store.snapshot();
        let Some(tailed) = checkpoint.tailed_file else {
            return;
        };

        let problem = if !self.config.tailing {
            Some("is tailed but tailing is disabled".to_string())
        } else if !tailed.starts_with(&self.config.root) {
            Some("is outside the watched directory".to_string())
        } else if !tailed.is_file() {
            Some("no longer exists".to_string())
        } else {
            self.set_state(ControllerState::OpenFile);
            match FileCursor::open(
                &tailed,
                checkpoint.offset,
                self.framer.clone(),
                true,
                self.config.read_limits(),
            ) {
                Ok(cursor) => {
                    info!(
                        source_id = %self.config.source_id,
                        path = ?tailed,
                        offset = cursor.current_offset(),
                        "Resuming tailed file from checkpoint"
                    );
                    self.store
                        .commit(cursor.current_offset(), Some(cursor.path()));
                    self.tail = Some(cursor);
                    self.set_state(ControllerState::ContinueTail);
                    None
                }
                Err(e) => Some(format!("cannot be opened: {}", e)),
            }
        };

        if let Some(problem) = problem {
            let err = Error::RestoreInconsistency(format!(
                "source '{}': checkpointed file {:?} {}",
                self.config.source_id, tailed, problem
            ));
            warn!(error = %err, "Ignoring checkpoint, starting fresh");
            self.store.reset();
        }
    }

    /// Apply a walker event to the pending queue and the tail target.
    pub fn handle_event(&mut self, event: FileEvent) {
        let is_tail = self.tail.as_ref().is_some_and(|c| c.path() == event.path);
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|c| c.path() == event.path)
            || self.stalled.contains_key(&event.path);

        match event.kind {
            FileEventKind::Create | FileEventKind::Modify => {
                if is_tail || is_current || self.processed.contains(&event.path) {
                    return;
                }
                if self.pending.insert(event.path.clone()) {
                    trace!(path = ?event.path, "Queued file");
                }
            }
            FileEventKind::Remove => {
                self.pending.remove(&event.path);
                self.processed.remove(&event.path);

                if is_current {
                    debug!(path = ?event.path, "File removed before it was fully read");
                    if self.current.as_ref().is_some_and(|c| c.path() == event.path) {
                        self.current = None;
                    }
                    self.stalled.remove(&event.path);
                }

                if is_tail {
                    info!(
                        source_id = %self.config.source_id,
                        path = ?event.path,
                        "Tailed file is gone, tailing moves to the next discovered file"
                    );
                    self.tail = None;
                    self.store.reset();
                }
            }
        }
    }

    /// One pass of the state machine: catch up on the tail, then drain queued
    /// files in name order. A tail claimed during the pass is drained before the
    /// files that sort after it.
    pub fn tick(&mut self) {
        if self.is_halted() {
            return;
        }
        self.poll_tail();
        self.process_pending();
        if self.tail.is_some() && !self.is_halted() {
            self.set_state(ControllerState::ContinueTail);
        }
    }

    fn process_pending(&mut self) {
        let mut retry = Vec::new();
        let mut failed = Vec::new();

        loop {
            if self.is_halted() {
                break;
            }

            let resume_stalled = match (self.stalled.keys().next(), self.pending.first()) {
                (Some(stalled), Some(pending)) => stalled < pending,
                (Some(_), None) => true,
                (None, _) => false,
            };

            let mut cursor = match self.current.take() {
                Some(cursor) => cursor,
                None if resume_stalled => match self.stalled.pop_first() {
                    Some((_, cursor)) => cursor,
                    None => break,
                },
                None => {
                    let Some(path) = self.pending.pop_first() else {
                        break;
                    };
                    self.set_state(ControllerState::DiscoverFile);

                    if self.config.tailing && self.tail.is_none() {
                        if let Some(path) = self.start_tail(path) {
                            retry.push(path);
                            continue;
                        }
                        // Its existing content comes before every later file
                        if self.tail.is_some() && !self.poll_tail() {
                            break;
                        }
                        continue;
                    }

                    self.set_state(ControllerState::OpenFile);
                    match FileCursor::open(
                        &path,
                        0,
                        self.framer.clone(),
                        false,
                        self.config.read_limits(),
                    ) {
                        Ok(cursor) => cursor,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            debug!(path = ?path, "File vanished before it could be opened");
                            continue;
                        }
                        Err(e) => {
                            self.log_unavailable(&path, &e);
                            retry.push(path);
                            continue;
                        }
                    }
                }
            };

            self.set_state(ControllerState::EmitRecords);
            match self.drain(&mut cursor, false) {
                Drain::Complete => {
                    self.set_state(ControllerState::FileComplete);
                    let path = cursor.path().to_path_buf();
                    drop(cursor);
                    self.complete_file(path);
                }
                Drain::Interrupted => {
                    self.current = Some(cursor);
                    break;
                }
                Drain::Failed => failed.push(cursor),
            }
        }

        self.pending.extend(retry);
        for cursor in failed {
            self.stalled.insert(cursor.path().to_path_buf(), cursor);
        }
    }

    /// Emit whatever the tail has available. Returns false when the pass was cut
    /// short by pause, cancellation or a refusal.
    fn poll_tail(&mut self) -> bool {
        if self.is_halted() {
            return false;
        }
        let Some(mut cursor) = self.tail.take() else {
            return true;
        };

        self.set_state(ControllerState::EmitRecords);
        let drained = self.drain(&mut cursor, true);
        self.tail = Some(cursor);
        self.set_state(ControllerState::ContinueTail);
        !matches!(drained, Drain::Interrupted)
    }

    /// Make `path` the tail target. Returns the path back when opening failed in
    /// a way worth retrying.
    fn start_tail(&mut self, path: PathBuf) -> Option<PathBuf> {
        self.set_state(ControllerState::OpenFile);
        match FileCursor::open(
            &path,
            0,
            self.framer.clone(),
            true,
            self.config.read_limits(),
        ) {
            Ok(cursor) => {
                info!(source_id = %self.config.source_id, path = ?path, "Tailing file");
                self.store.commit(cursor.current_offset(), Some(&path));
                self.tail = Some(cursor);
                self.set_state(ControllerState::ContinueTail);
                None
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "File vanished before it could be tailed");
                None
            }
            Err(e) => {
                self.log_unavailable(&path, &e);
                Some(path)
            }
        }
    }

    fn drain(&self, cursor: &mut FileCursor, tailed: bool) -> Drain {
        loop {
            if self.is_halted() {
                return Drain::Interrupted;
            }

            match cursor.read_next_record() {
                Ok(ReadOutcome::Record(record)) => {
                    if !self.deliver(cursor, record, tailed) {
                        return Drain::Interrupted;
                    }
                }
                Ok(ReadOutcome::Incomplete) | Ok(ReadOutcome::Eof) => return Drain::Complete,
                Err(e) => {
                    self.log_unavailable(cursor.path(), &e);
                    let offset = cursor.current_offset();
                    if let Err(e) = cursor.rewind(offset) {
                        debug!(path = ?cursor.path(), error = %e, "Failed to reposition cursor");
                    }
                    return Drain::Failed;
                }
            }
        }
    }

    /// Hand a record to the listener. On refusal the cursor is moved back so the
    /// record is offered again on a later pass.
    fn deliver(&self, cursor: &mut FileCursor, record: Record, tailed: bool) -> bool {
        let offset = record.offset;
        let end_offset = record.end_offset();

        match self.listener.on_record(record) {
            Ok(()) => {
                if tailed {
                    self.store.commit(end_offset, Some(cursor.path()));
                }
                true
            }
            Err(e) => {
                warn!(
                    source_id = %self.config.source_id,
                    path = ?cursor.path(),
                    offset,
                    error = %e,
                    "Record was not accepted, retrying later"
                );
                if let Err(e) = cursor.rewind(offset) {
                    warn!(path = ?cursor.path(), error = %e, "Failed to rewind cursor");
                }
                false
            }
        }
    }

    fn complete_file(&mut self, path: PathBuf) {
        debug!(source_id = %self.config.source_id, path = ?path, "File fully consumed");

        let Some(action) = self.config.action_after_process.clone() else {
            self.processed.insert(path);
            return;
        };

        self.set_state(ControllerState::PostProcess);
        if let Err(e) = self.post_processor.apply(&path, &action) {
            warn!(
                source_id = %self.config.source_id,
                action = action.name(),
                error = %e,
                "Post-processing failed, leaving file in place"
            );
            self.processed.insert(path);
        }
    }

    fn log_unavailable(&self, path: &Path, e: &io::Error) {
        let err = Error::ConnectionUnavailable(format!(
            "source '{}': reading {:?} failed: {}",
            self.config.source_id, path, e
        ));
        warn!(error = %err, "File read failed, will retry");
    }

    fn is_halted(&self) -> bool {
        self.cancel.is_cancelled() || self.paused.load(Ordering::SeqCst)
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "Controller state change");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::file::checkpoint::Checkpoint;
    use crate::sources::file::config::{ActionAfterProcess, Mode};
    use crate::sources::file::error::Result;
    use crate::sources::file::post_process::FsPostProcessor;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Listener that records payloads and can refuse a number of deliveries
    #[derive(Default)]
    struct Collector {
        records: Mutex<Vec<Record>>,
        refuse: Mutex<usize>,
    }

    impl Collector {
        fn payloads(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.as_str_lossy().into_owned())
                .collect()
        }
    }

    impl RecordListener for Collector {
        fn on_record(&self, record: Record) -> Result<()> {
            let mut refuse = self.refuse.lock().unwrap();
            if *refuse > 0 {
                *refuse -= 1;
                return Err(Error::Listener("downstream busy".to_string()));
            }
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct FailingPostProcess;

    impl PostProcess for FailingPostProcess {
        fn apply(&self, path: &Path, _action: &ActionAfterProcess) -> Result<()> {
            Err(Error::PostProcess {
                path: path.to_path_buf(),
                reason: "target unwritable".to_string(),
            })
        }
    }

    /// Fails for one file name and post-processes every other file normally
    struct FailFor(&'static str);

    impl PostProcess for FailFor {
        fn apply(&self, path: &Path, action: &ActionAfterProcess) -> Result<()> {
            if path.file_name().is_some_and(|n| n == self.0) {
                return Err(Error::PostProcess {
                    path: path.to_path_buf(),
                    reason: "target unwritable".to_string(),
                });
            }
            FsPostProcessor.apply(path, action)
        }
    }

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        store: CheckpointStore,
        collector: Arc<Collector>,
        paused: Arc<AtomicBool>,
        controller: IngestionController,
    }

    impl Harness {
        fn new(tailing: bool, action: Option<ActionAfterProcess>) -> Self {
            Self::with(tailing, action, Arc::new(FsPostProcessor), CheckpointStore::new())
        }

        fn with(
            tailing: bool,
            action: Option<ActionAfterProcess>,
            post_processor: Arc<dyn PostProcess>,
            store: CheckpointStore,
        ) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("in");
            fs::create_dir(&root).unwrap();

            let config = FileSourceConfig {
                root: root.clone(),
                mode: Mode::Line,
                tailing,
                action_after_process: action,
                ..Default::default()
            };
            let collector = Arc::new(Collector::default());
            let paused = Arc::new(AtomicBool::new(false));
            let controller = IngestionController::new(
                config,
                Arc::new(Framer::Line),
                store.clone(),
                collector.clone(),
                post_processor,
                paused.clone(),
                CancellationToken::new(),
            );

            Self {
                _dir: dir,
                root,
                store,
                collector,
                paused,
                controller,
            }
        }

        fn write(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.root.join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn append(&self, name: &str, content: &[u8]) {
            let mut f = OpenOptions::new()
                .append(true)
                .open(self.root.join(name))
                .unwrap();
            f.write_all(content).unwrap();
        }

        fn discover(&mut self, path: &Path) {
            self.controller.handle_event(FileEvent::create(path.to_path_buf()));
        }

        /// Rebuild the controller over the same directory from the last
        /// checkpoint, as a process restart would.
        fn restart(&mut self) {
            let store = CheckpointStore::new();
            store.restore(self.store.snapshot());
            self.collector = Arc::new(Collector::default());
            self.controller = IngestionController::new(
                self.controller.config.clone(),
                Arc::new(Framer::Line),
                store.clone(),
                self.collector.clone(),
                Arc::new(FsPostProcessor),
                self.paused.clone(),
                CancellationToken::new(),
            );
            self.store = store;
            self.controller.restore_tail();
        }
    }

    #[test]
    fn test_files_processed_in_name_order_and_deleted() {
        let mut h = Harness::new(false, Some(ActionAfterProcess::Delete));
        let b = h.write("b.log", b"B\n");
        let a = h.write("a.log", b"A\n");
        h.discover(&b);
        h.discover(&a);

        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A", "B"]);
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(h.store.snapshot(), Checkpoint::default());
        assert_eq!(h.controller.state(), ControllerState::PostProcess);
    }

    #[test]
    fn test_first_file_is_tailed_and_never_post_processed() {
        let mut h = Harness::new(true, Some(ActionAfterProcess::Delete));
        let a = h.write("a.log", b"A1\n");
        let b = h.write("b.log", b"B1\n");
        h.discover(&a);
        h.discover(&b);

        h.controller.tick();
        assert_eq!(h.controller.tailed_file(), Some(a.as_path()));
        assert!(a.exists());
        assert!(!b.exists());
        assert_eq!(h.controller.state(), ControllerState::ContinueTail);

        assert_eq!(h.collector.payloads(), vec!["A1", "B1"]);

        h.append("a.log", b"A2\n");
        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A1", "B1", "A2"]);
        assert_eq!(h.store.snapshot(), Checkpoint::new(6, Some(a.clone())));
        assert!(a.exists());
    }

    #[test]
    fn test_tailed_file_content_precedes_later_files() {
        let mut h = Harness::new(true, Some(ActionAfterProcess::Delete));
        let a = h.write("a.log", b"A1\nA2\n");
        let b = h.write("b.log", b"B1\n");
        h.discover(&a);
        h.discover(&b);

        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A1", "A2", "B1"]);
        assert_eq!(h.store.snapshot(), Checkpoint::new(6, Some(a)));
        assert!(!b.exists());
    }

    #[test]
    fn test_refused_record_is_redelivered_once() {
        let mut h = Harness::new(false, Some(ActionAfterProcess::Delete));
        let a = h.write("a.log", b"A\nB\nC\n");
        h.discover(&a);

        *h.collector.refuse.lock().unwrap() = 1;
        h.controller.tick();
        assert!(h.collector.payloads().is_empty());
        assert!(a.exists());

        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["A", "B", "C"]);
        assert!(!a.exists());
    }

    #[test]
    fn test_refusal_rewinds_tail_without_advancing_checkpoint() {
        let mut h = Harness::new(true, None);
        let a = h.write("a.log", b"A\n");
        h.discover(&a);
        h.controller.tick();
        assert_eq!(h.store.snapshot().offset, 2);

        h.append("a.log", b"B\n");
        *h.collector.refuse.lock().unwrap() = 1;
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["A"]);
        assert_eq!(h.store.snapshot().offset, 2);

        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["A", "B"]);
        assert_eq!(h.store.snapshot().offset, 4);
    }

    #[test]
    fn test_restore_resumes_from_offset() {
        let store = CheckpointStore::new();
        let mut h = Harness::with(true, None, Arc::new(FsPostProcessor), store.clone());
        let a = h.write("a.log", b"A\nB\nC\n");
        store.restore(Checkpoint::new(2, Some(a.clone())));

        h.controller.restore_tail();
        h.discover(&a);
        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["B", "C"]);
        assert_eq!(h.store.snapshot(), Checkpoint::new(6, Some(a)));
    }

    #[test]
    fn test_restore_of_missing_file_starts_fresh() {
        let store = CheckpointStore::new();
        let mut h = Harness::with(true, None, Arc::new(FsPostProcessor), store.clone());
        store.restore(Checkpoint::new(10, Some(h.root.join("gone.log"))));

        h.controller.restore_tail();
        assert_eq!(store.snapshot(), Checkpoint::default());
        assert!(h.controller.tailed_file().is_none());

        let b = h.write("b.log", b"B\n");
        h.discover(&b);
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B"]);
        assert_eq!(h.controller.tailed_file(), Some(b.as_path()));
    }

    #[test]
    fn test_removed_tail_moves_to_next_file() {
        let mut h = Harness::new(true, None);
        let a = h.write("a.log", b"A\n");
        h.discover(&a);
        h.controller.tick();
        assert_eq!(h.controller.tailed_file(), Some(a.as_path()));

        fs::remove_file(&a).unwrap();
        h.controller.handle_event(FileEvent::remove(a.clone()));
        assert!(h.controller.tailed_file().is_none());
        assert_eq!(h.store.snapshot(), Checkpoint::default());

        let b = h.write("b.log", b"B\n");
        h.discover(&b);
        h.controller.tick();
        assert_eq!(h.controller.tailed_file(), Some(b.as_path()));
        assert_eq!(h.store.snapshot(), Checkpoint::new(2, Some(b)));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut h = Harness::new(false, Some(ActionAfterProcess::Delete));
        let a = h.write("a.log", b"A\n");
        h.discover(&a);

        h.paused.store(true, Ordering::SeqCst);
        h.controller.tick();
        assert!(h.collector.payloads().is_empty());
        assert!(a.exists());

        h.paused.store(false, Ordering::SeqCst);
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["A"]);
    }

    #[test]
    fn test_processed_file_is_not_reread() {
        let mut h = Harness::new(true, None);
        let a = h.write("a.log", b"A\n");
        let b = h.write("b.log", b"B\n");
        h.discover(&a);
        h.discover(&b);
        h.controller.tick();

        h.append("b.log", b"B2\n");
        h.controller.handle_event(FileEvent::modify(b.clone()));
        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A", "B"]);
        assert!(b.exists());
    }

    #[test]
    fn test_failed_post_process_leaves_file_once() {
        let mut h = Harness::with(
            false,
            Some(ActionAfterProcess::Move {
                target: PathBuf::from("/nonexistent/target"),
            }),
            Arc::new(FailingPostProcess),
            CheckpointStore::new(),
        );
        let a = h.write("a.log", b"A\n");
        h.discover(&a);
        h.controller.tick();

        h.controller.handle_event(FileEvent::modify(a.clone()));
        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A"]);
        assert!(a.exists());
    }

    #[test]
    fn test_failed_post_process_does_not_block_next_file() {
        let mut h = Harness::with(
            false,
            Some(ActionAfterProcess::Delete),
            Arc::new(FailFor("a.log")),
            CheckpointStore::new(),
        );
        let a = h.write("a.log", b"A\n");
        let b = h.write("b.log", b"B\n");
        h.discover(&a);
        h.discover(&b);

        h.controller.tick();

        assert_eq!(h.collector.payloads(), vec!["A", "B"]);
        assert!(a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn test_unreadable_file_is_requeued_while_next_file_proceeds() {
        let mut h = Harness::new(false, Some(ActionAfterProcess::Delete));
        let a = h.write("a.log", b"A\n");
        let b = h.write("b.log", b"B\n");
        fs::set_permissions(&a, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&a).is_ok() {
            // Permission bits are not enforced for this user
            return;
        }
        h.discover(&a);
        h.discover(&b);

        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B"]);
        assert!(a.exists());
        assert!(!b.exists());

        fs::set_permissions(&a, fs::Permissions::from_mode(0o644)).unwrap();
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B", "A"]);
        assert!(!a.exists());
    }

    #[test]
    fn test_read_failure_is_isolated_to_its_file() {
        let mut h = Harness::new(false, Some(ActionAfterProcess::Delete));
        // Opening a directory succeeds but reading it fails
        let a = h.root.join("a.log");
        fs::create_dir(&a).unwrap();
        let b = h.write("b.log", b"B\n");
        h.discover(&a);
        h.discover(&b);

        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B"]);
        assert!(!b.exists());

        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B"]);

        fs::remove_dir(&a).unwrap();
        h.controller.handle_event(FileEvent::remove(a.clone()));
        let a = h.write("a.log", b"A\n");
        h.discover(&a);
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["B", "A"]);
        assert!(!a.exists());
    }

    #[test]
    fn test_untailed_file_without_action_is_reemitted_after_restart() {
        let mut h = Harness::new(true, None);
        let a = h.write("a.log", b"A\n");
        let b = h.write("b.log", b"B\n");
        h.discover(&a);
        h.discover(&b);
        h.controller.tick();
        assert_eq!(h.collector.payloads(), vec!["A", "B"]);
        assert!(b.exists());
        assert_eq!(h.store.snapshot(), Checkpoint::new(2, Some(a.clone())));

        h.restart();
        h.discover(&a);
        h.discover(&b);
        h.controller.tick();

        // The checkpoint only covers the tail, so b.log is delivered again
        assert_eq!(h.collector.payloads(), vec!["B"]);
        assert_eq!(h.controller.tailed_file(), Some(a.as_path()));
    }
}
