// SPDX-License-Identifier: Apache-2.0

//! Directory file source.
//!
//! Watches a single directory, frames file content into records (lines, regex
//! delimited blocks or whole files), optionally tails the first file it finds and
//! deletes or moves files once they are fully consumed. The position in the tailed
//! file is checkpointed after every delivered record, so a restart resumes without
//! gaps or duplicates.

pub mod checkpoint;
pub mod checkpoint_committer;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod framer;
pub mod persistence;
pub mod post_process;
pub mod record;
pub mod source;
pub mod walker;

pub use checkpoint::{Checkpoint, CheckpointState, CheckpointStore};
pub use config::{ActionAfterProcess, FileSourceConfig, Mode};
pub use error::{Error, Result};
pub use record::{ChannelListener, Record, RecordListener};
pub use source::FileSource;
