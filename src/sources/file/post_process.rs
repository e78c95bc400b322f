// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::sources::file::config::ActionAfterProcess;
use crate::sources::file::error::{Error, Result};

/// Disposes of a file once all of its records have been delivered
pub trait PostProcess: Send + Sync {
    fn apply(&self, path: &Path, action: &ActionAfterProcess) -> Result<()>;
}

/// Deletes or moves files on the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPostProcessor;

impl PostProcess for FsPostProcessor {
    fn apply(&self, path: &Path, action: &ActionAfterProcess) -> Result<()> {
        let failed = |reason: String| Error::PostProcess {
            path: path.to_path_buf(),
            reason,
        };

        match action {
            ActionAfterProcess::Delete => {
                fs::remove_file(path).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => failed("file no longer exists".to_string()),
                    _ => failed(format!("delete failed: {}", e)),
                })?;
                info!(path = ?path, "Deleted processed file");
            }
            ActionAfterProcess::Move { target } => {
                let file_name = path
                    .file_name()
                    .ok_or_else(|| failed("path has no file name".to_string()))?;

                fs::create_dir_all(target).map_err(|e| {
                    failed(format!("cannot create target directory {:?}: {}", target, e))
                })?;

                let dest = target.join(file_name);
                if let Err(e) = fs::rename(path, &dest) {
                    if e.kind() == io::ErrorKind::NotFound && !path.exists() {
                        return Err(failed("file no longer exists".to_string()));
                    }
                    // Rename cannot cross filesystems
                    debug!(path = ?path, dest = ?dest, error = %e, "Rename failed, copying instead");
                    fs::copy(path, &dest)
                        .map_err(|e| failed(format!("move to {:?} failed: {}", dest, e)))?;
                    fs::remove_file(path).map_err(|e| {
                        failed(format!("copied to {:?} but removing source failed: {}", dest, e))
                    })?;
                }
                info!(path = ?path, dest = ?dest, "Moved processed file");
            }
        }
        Ok(())
    }
}
