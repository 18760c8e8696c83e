//! In-memory database for tests and ephemeral nodes.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::kv::{BatchOp, Database, WriteBatch};

/// A [`Database`] backed by an ordered map.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Option<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Number of stored entries. Zero after close.
    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Database for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut guard = self.inner.write();
        let map = guard.as_mut().ok_or(StorageError::Closed)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut guard = self.inner.write();
        let map = guard.as_mut().ok_or(StorageError::Closed)?;
        map.remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = self.inner.write();
        let map = guard.as_mut().ok_or(StorageError::Closed)?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.inner.read();
        let map = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.inner.write().take();
        Ok(())
    }
}
