// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::sources::file::error::{Error, Result};

/// Scoped key/value storage for source state
pub trait Persister: Send {
    /// Load the persisted scope into memory, replacing anything cached.
    fn load(&mut self) -> Result<()>;

    /// Write the cached scope to durable storage.
    fn sync(&self) -> Result<()>;

    fn get_value(&self, key: &str) -> Option<&serde_json::Value>;

    fn set_value(&mut self, key: &str, value: serde_json::Value);

    fn delete(&mut self, key: &str);
}

/// Typed helpers on top of [`Persister`]
pub trait PersisterExt: Persister {
    fn set_raw_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| Error::Persistence(format!("failed to serialize to JSON: {}", e)))?;
        self.set_value(key, json_value);
        Ok(())
    }

    /// Returns Ok(None) when the key is absent and Err when it exists but does
    /// not deserialize.
    fn try_get_raw_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::result::Result<Option<T>, serde_json::Error> {
        match self.get_value(key) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some),
        }
    }
}

impl<P: Persister + ?Sized> PersisterExt for P {}

/// Mock persister for testing
#[cfg(test)]
pub struct MockPersister {
    data: std::collections::HashMap<String, serde_json::Value>,
    synced: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, serde_json::Value>>>,
    fail_sync: std::sync::Arc<std::sync::atomic::AtomicBool>,
    sync_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl MockPersister {
    pub fn new() -> Self {
        Self {
            data: Default::default(),
            synced: Default::default(),
            fail_sync: Default::default(),
            sync_count: Default::default(),
        }
    }

    /// Toggle for making subsequent syncs fail
    pub fn fail_sync_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.fail_sync.clone()
    }

    pub fn sync_count_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        self.sync_count.clone()
    }

    /// View of what the last successful sync wrote
    pub fn synced_handle(
        &self,
    ) -> std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, serde_json::Value>>>
    {
        self.synced.clone()
    }
}

#[cfg(test)]
impl Persister for MockPersister {
    fn load(&mut self) -> Result<()> {
        self.data = self.synced.lock().unwrap().clone();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        use std::sync::atomic::Ordering;

        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(Error::Persistence("mock sync failure".to_string()));
        }
        *self.synced.lock().unwrap() = self.data.clone();
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    fn set_value(&mut self, key: &str, value: serde_json::Value) {
        self.data.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }
}
