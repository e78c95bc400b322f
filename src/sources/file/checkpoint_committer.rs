// SPDX-License-Identifier: Apache-2.0

//! Periodic persistence of the source checkpoint.
//!
//! The ingestion worker only updates the in-memory [`CheckpointStore`]. This task
//! snapshots the store on an interval and writes it through a [`Persister`], so a
//! slow disk never stalls record delivery. A final checkpoint is written when the
//! task is cancelled.

use std::time::{Duration, Instant};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sources::file::checkpoint::{Checkpoint, CheckpointState, CheckpointStore};
use crate::sources::file::error::{Error, Result};
use crate::sources::file::persistence::{Persister, PersisterExt};

/// Key the checkpoint map is stored under inside the source's scope
pub const CHECKPOINT_KEY: &str = "checkpoint";

/// Configuration for the checkpoint committer
pub struct CheckpointCommitterConfig {
    /// Interval between periodic checkpoints
    pub checkpoint_interval: Duration,
    /// Maximum duration of consecutive checkpoint failures before returning error
    pub max_checkpoint_failure_duration: Duration,
}

impl Default for CheckpointCommitterConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(1),
            max_checkpoint_failure_duration: Duration::from_secs(60),
        }
    }
}

/// Load a previously persisted checkpoint, if any.
pub fn load_checkpoint<P: Persister>(persister: &mut P) -> Result<Option<Checkpoint>> {
    persister.load()?;

    let corrupted = |reason: String| {
        Error::Persistence(format!(
            "checkpoint state is corrupted ({}), delete the checkpoint file to start fresh",
            reason
        ))
    };

    match persister.try_get_raw_json::<CheckpointState>(CHECKPOINT_KEY) {
        Ok(None) => Ok(None),
        Ok(Some(state)) => Checkpoint::from_state(&state)
            .map(Some)
            .map_err(|e| corrupted(e.to_string())),
        Err(e) => Err(corrupted(e.to_string())),
    }
}

/// Writes checkpoint snapshots to durable storage
pub struct CheckpointCommitter<P: Persister> {
    store: CheckpointStore,
    persister: P,
    config: CheckpointCommitterConfig,
    /// Last checkpoint written successfully
    last_persisted: Option<Checkpoint>,
    /// Tracks when checkpoint failures started (for threshold-based exit)
    checkpoint_first_failure: Option<Instant>,
}

impl<P: Persister> CheckpointCommitter<P> {
    pub fn new(store: CheckpointStore, persister: P, config: CheckpointCommitterConfig) -> Self {
        Self {
            store,
            persister,
            config,
            last_persisted: None,
            checkpoint_first_failure: None,
        }
    }

    /// Run until cancelled, then write a final checkpoint.
    ///
    /// Returns an error if checkpoint failures persist beyond the configured threshold.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<()> {
        info!("Checkpoint committer started");

        let mut interval = tokio::time::interval(self.config.checkpoint_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut fatal_error = None;

        loop {
            select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("Checkpoint committer cancelled");
                    break;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.maybe_checkpoint() {
                        error!("Checkpoint failures persisted beyond threshold, exiting: {}", e);
                        fatal_error = Some(e);
                        break;
                    }
                }
            }
        }

        debug!("Performing final checkpoint");
        match self.checkpoint() {
            Ok(()) => info!("Final checkpoint completed successfully"),
            Err(e) => warn!("Failed to perform final checkpoint: {}", e),
        }

        match fatal_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Checkpoint and track failures. Only errors once failures have lasted
    /// longer than the configured threshold.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.checkpoint() {
            Ok(()) => {
                if self.checkpoint_first_failure.is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                    self.checkpoint_first_failure = None;
                }
                Ok(())
            }
            Err(e) => {
                let first_failure = *self
                    .checkpoint_first_failure
                    .get_or_insert_with(Instant::now);
                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.config.max_checkpoint_failure_duration {
                    Err(e)
                } else {
                    warn!(
                        "Checkpoint failed (failures started {:?} ago): {}",
                        failure_duration, e
                    );
                    Ok(())
                }
            }
        }
    }

    /// Persist the current snapshot unless it matches the last one written.
    fn checkpoint(&mut self) -> Result<()> {
        let snapshot = self.store.snapshot();
        if self.last_persisted.as_ref() == Some(&snapshot) {
            return Ok(());
        }

        self.persister
            .set_raw_json(CHECKPOINT_KEY, &snapshot.to_state())?;
        self.persister.sync()?;

        debug!(
            offset = snapshot.offset,
            tailed_file = ?snapshot.tailed_file,
            "Checkpoint persisted"
        );
        self.last_persisted = Some(snapshot);
        Ok(())
    }
}
