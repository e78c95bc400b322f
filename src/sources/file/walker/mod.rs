// SPDX-License-Identifier: Apache-2.0

//! Directory discovery for the file source.

mod poll;
mod traits;

pub use poll::PollWalker;
pub use traits::{DirectoryWalker, FileEvent, FileEventKind, WalkerError};
