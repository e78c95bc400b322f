// SPDX-License-Identifier: Apache-2.0

//! File source lifecycle.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender, RecvTimeout};
use crate::sources::file::checkpoint::{Checkpoint, CheckpointState, CheckpointStore};
use crate::sources::file::config::FileSourceConfig;
use crate::sources::file::controller::IngestionController;
use crate::sources::file::error::{Error, Result};
use crate::sources::file::framer::Framer;
use crate::sources::file::post_process::{FsPostProcessor, PostProcess};
use crate::sources::file::record::RecordListener;
use crate::sources::file::walker::{DirectoryWalker, FileEvent, PollWalker};

/// Capacity of the walker to worker hand-off
const EVENT_CHANNEL_SIZE: usize = 1024;

struct Running {
    cancel: CancellationToken,
    shutdown_tx: BoundedSender<()>,
    discovery: JoinHandle<Box<dyn DirectoryWalker>>,
    worker: JoinHandle<()>,
}

/// A directory file source.
///
/// `restore` must be called before `connect`. `snapshot` may be called at any
/// time from any thread.
pub struct FileSource {
    config: FileSourceConfig,
    framer: Arc<Framer>,
    store: CheckpointStore,
    listener: Arc<dyn RecordListener>,
    post_processor: Arc<dyn PostProcess>,
    /// Present while disconnected, handed to the discovery thread while connected
    walker: Option<Box<dyn DirectoryWalker>>,
    paused: Arc<AtomicBool>,
    running: Option<Running>,
}

impl FileSource {
    /// Create a source using the polling walker and filesystem post-processing.
    pub fn new(config: FileSourceConfig, listener: Arc<dyn RecordListener>) -> Result<Self> {
        let walker = Box::new(PollWalker::new(config.root.clone()));
        Self::with_collaborators(
            config,
            walker,
            CheckpointStore::new(),
            Arc::new(FsPostProcessor),
            listener,
        )
    }

    pub fn with_collaborators(
        config: FileSourceConfig,
        walker: Box<dyn DirectoryWalker>,
        store: CheckpointStore,
        post_processor: Arc<dyn PostProcess>,
        listener: Arc<dyn RecordListener>,
    ) -> Result<Self> {
        config.validate()?;
        let framer = Arc::new(Framer::from_config(&config)?);

        Ok(Self {
            config,
            framer,
            store,
            listener,
            post_processor,
            walker: Some(walker),
            paused: Arc::new(AtomicBool::new(false)),
            running: None,
        })
    }

    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// Shared handle to the checkpoint store, for persistence tasks
    pub fn checkpoint_store(&self) -> CheckpointStore {
        self.store.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Start discovery and ingestion.
    pub fn connect(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(self.invalid_state("already connected"));
        }

        if let Err(e) = fs::read_dir(&self.config.root) {
            return Err(Error::ConnectionUnavailable(format!(
                "source '{}': cannot read directory {:?}: {}",
                self.config.source_id, self.config.root, e
            )));
        }

        let walker = self
            .walker
            .take()
            .ok_or_else(|| self.invalid_state("directory walker was lost"))?;

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = bounded_channel::bounded(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = bounded_channel::bounded::<()>(1);

        let controller = IngestionController::new(
            self.config.clone(),
            self.framer.clone(),
            self.store.clone(),
            self.listener.clone(),
            self.post_processor.clone(),
            self.paused.clone(),
            cancel.clone(),
        );

        let worker = thread::Builder::new()
            .name(format!("{}-ingest", self.config.source_id))
            .spawn(move || controller.run(events_rx))?;

        let discovery_cancel = cancel.clone();
        let paused = self.paused.clone();
        let interval = self.config.discovery_interval;
        let source_id = self.config.source_id.clone();
        let discovery = thread::Builder::new()
            .name(format!("{}-discovery", self.config.source_id))
            .spawn(move || {
                discovery_loop(
                    walker,
                    events_tx,
                    shutdown_rx,
                    paused,
                    discovery_cancel,
                    interval,
                    source_id,
                )
            });

        let discovery = match discovery {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                let _ = worker.join();
                return Err(e.into());
            }
        };

        info!(
            source_id = %self.config.source_id,
            root = ?self.config.root,
            "File source connected"
        );

        self.running = Some(Running {
            cancel,
            shutdown_tx,
            discovery,
            worker,
        });
        Ok(())
    }

    /// Stop discovery and tailing and wait for both threads to exit. Calling this
    /// on a disconnected source does nothing.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            debug!(source_id = %self.config.source_id, "Disconnect on an idle source");
            return Ok(());
        };

        running.cancel.cancel();
        drop(running.shutdown_tx);

        let discovery = running.discovery.join();
        let worker = running.worker.join();

        match discovery {
            Ok(walker) => self.walker = Some(walker),
            Err(_) => return Err(self.invalid_state("discovery thread panicked")),
        }
        if worker.is_err() {
            return Err(self.invalid_state("ingestion thread panicked"));
        }

        info!(source_id = %self.config.source_id, "File source disconnected");
        Ok(())
    }

    /// Suspend discovery and tailing. Cursors and the checkpoint are kept.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(source_id = %self.config.source_id, "File source paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(source_id = %self.config.source_id, "File source resumed");
        }
    }

    /// Position after the last record accepted by the listener.
    pub fn snapshot(&self) -> Checkpoint {
        self.store.snapshot()
    }

    pub fn snapshot_state(&self) -> CheckpointState {
        self.snapshot().to_state()
    }

    /// Install a checkpoint to resume from. Only valid before `connect`.
    pub fn restore(&self, checkpoint: Checkpoint) -> Result<()> {
        if self.running.is_some() {
            return Err(self.invalid_state("restore must be called before connect"));
        }
        debug!(
            source_id = %self.config.source_id,
            offset = checkpoint.offset,
            tailed_file = ?checkpoint.tailed_file,
            "Restoring checkpoint"
        );
        self.store.restore(checkpoint);
        Ok(())
    }

    pub fn restore_state(&self, state: &CheckpointState) -> Result<()> {
        self.restore(Checkpoint::from_state(state)?)
    }

    fn invalid_state(&self, msg: &str) -> Error {
        Error::InvalidState(format!("source '{}': {}", self.config.source_id, msg))
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "Failed to stop file source cleanly");
        }
    }
}

fn discovery_loop(
    mut walker: Box<dyn DirectoryWalker>,
    events_tx: BoundedSender<FileEvent>,
    shutdown_rx: BoundedReceiver<()>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    interval: Duration,
    source_id: String,
) -> Box<dyn DirectoryWalker> {
    debug!(
        source_id = %source_id,
        backend = walker.backend_name(),
        root = ?walker.root(),
        "Directory discovery started"
    );

    let mut unreachable = false;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        if !paused.load(Ordering::SeqCst) {
            match walker.scan() {
                Ok(events) => {
                    if unreachable {
                        info!(source_id = %source_id, "Directory is reachable again");
                        unreachable = false;
                    }
                    for event in events {
                        if events_tx.send_blocking(event).is_err() {
                            return walker;
                        }
                    }
                }
                Err(e) => {
                    // Only the first failure of a streak is worth a warning
                    if !unreachable {
                        let err =
                            Error::ConnectionUnavailable(format!("source '{}': {}", source_id, e));
                        warn!(error = %err, "Directory scan failed");
                        unreachable = true;
                    }
                }
            }
        }

        match shutdown_rx.recv_timeout(interval) {
            RecvTimeout::Timeout => {}
            RecvTimeout::Item(()) | RecvTimeout::Disconnected => break,
        }
    }

    debug!(source_id = %source_id, "Directory discovery stopped");
    walker
}
