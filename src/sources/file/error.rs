// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Post-process failed for {path:?}: {reason}")]
    PostProcess { path: PathBuf, reason: String },

    #[error("Restore inconsistency: {0}")]
    RestoreInconsistency(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Listener rejected record: {0}")]
    Listener(String),

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
