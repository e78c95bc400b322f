// SPDX-License-Identifier: Apache-2.0

//! Persistence for source checkpoints.
//!
//! Uses JSON file storage with atomic writes.

mod json_file;
mod store;

pub use json_file::{JsonFileDatabase, JsonFilePersister};
#[cfg(test)]
pub use store::MockPersister;
pub use store::{Persister, PersisterExt};
