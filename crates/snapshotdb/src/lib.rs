//! Layered snapshot store for proof-of-stake plugin state.
//!
//! Plugins write their per-block state into a pending layer opened for
//! each block being processed. Committing a block folds its layer into
//! the base atomically and advances the recorded head. The base also
//! carries a handful of flat keys, among them the fast-sync sentinel the
//! startup recovery gate probes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use phoenix_core::H256;
use phoenix_storage::{Database, StorageError, WriteBatch};

/// Directory name of the snapshot database under the data directory.
pub const DB_PATH: &str = "snapshotdb";

/// Sentinel written when a fast sync begins and removed when it
/// completes. Its presence at startup means the sync was aborted.
pub const FAST_SYNC_STATUS_KEY: &[u8] = b"fast-sync-status";

const CURRENT_KEY: &[u8] = b"snapshot-current";

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors from the snapshot store.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("snapshot encoding: {0}")]
    Encoding(String),

    #[error("no pending layer for block {0}")]
    UnknownBlock(H256),

    #[error("commit out of order: committing {got}, head is {head}")]
    OutOfOrder { got: u64, head: u64 },
}

/// The highest committed block of the snapshot store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHead {
    pub number: u64,
    pub hash: H256,
}

struct PendingLayer {
    number: u64,
    // None marks a delete folded into the base on commit.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// Layered key-value store committed one block at a time.
pub struct SnapshotDb {
    db: Arc<dyn Database>,
    pending: RwLock<HashMap<H256, PendingLayer>>,
    current: RwLock<Option<SnapshotHead>>,
}

impl SnapshotDb {
    /// Opens the store over an already-open database, loading the head.
    pub fn open(db: Arc<dyn Database>) -> Result<Self> {
        let current = match db.get(CURRENT_KEY)? {
            Some(raw) => Some(
                bincode::deserialize(&raw).map_err(|e| SnapshotError::Encoding(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            db,
            pending: RwLock::new(HashMap::new()),
            current: RwLock::new(current),
        })
    }

    /// The highest committed block, if any block has been committed.
    pub fn current(&self) -> Option<SnapshotHead> {
        *self.current.read()
    }

    /// Opens a pending layer for the block being processed. Reopening an
    /// existing layer clears it.
    pub fn new_block(&self, number: u64, hash: H256) -> Result<()> {
        self.pending.write().insert(
            hash,
            PendingLayer {
                number,
                writes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Writes into the pending layer of `hash`.
    pub fn put(&self, hash: &H256, key: &[u8], value: &[u8]) -> Result<()> {
        let mut pending = self.pending.write();
        let layer = pending
            .get_mut(hash)
            .ok_or(SnapshotError::UnknownBlock(*hash))?;
        layer.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Marks `key` deleted in the pending layer of `hash`.
    pub fn delete(&self, hash: &H256, key: &[u8]) -> Result<()> {
        let mut pending = self.pending.write();
        let layer = pending
            .get_mut(hash)
            .ok_or(SnapshotError::UnknownBlock(*hash))?;
        layer.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Reads through the pending layer of `hash` (when given) into the base.
    pub fn get(&self, hash: Option<&H256>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(hash) = hash {
            let pending = self.pending.read();
            if let Some(layer) = pending.get(hash) {
                if let Some(slot) = layer.writes.get(key) {
                    return Ok(slot.clone());
                }
            }
        }
        self.get_base(key)
    }

    /// Reads a key directly from the committed base.
    pub fn get_base(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    /// Writes a flat base key outside any block layer.
    pub fn put_base(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.db.put(key, value)?)
    }

    /// Removes a flat base key.
    pub fn delete_base(&self, key: &[u8]) -> Result<()> {
        Ok(self.db.delete(key)?)
    }

    /// All committed entries whose key starts with `prefix`, in key order.
    /// Pending layers are not consulted.
    pub fn scan_base(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.db.scan_prefix(prefix)?)
    }

    /// Folds the pending layer of `hash` into the base and advances the
    /// head. The fold and the head update are applied atomically.
    pub fn commit(&self, hash: &H256) -> Result<()> {
        let layer = self
            .pending
            .write()
            .remove(hash)
            .ok_or(SnapshotError::UnknownBlock(*hash))?;

        if let Some(head) = self.current() {
            if layer.number != head.number + 1 {
                // Put the layer back so the caller can inspect it.
                self.pending.write().insert(
                    *hash,
                    PendingLayer {
                        number: layer.number,
                        writes: layer.writes,
                    },
                );
                return Err(SnapshotError::OutOfOrder {
                    got: layer.number,
                    head: head.number,
                });
            }
        }

        let head = SnapshotHead {
            number: layer.number,
            hash: *hash,
        };
        let encoded =
            bincode::serialize(&head).map_err(|e| SnapshotError::Encoding(e.to_string()))?;

        let mut batch = WriteBatch::new();
        for (key, value) in layer.writes {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }
        batch.put(CURRENT_KEY.to_vec(), encoded);
        self.db.write(batch)?;

        *self.current.write() = Some(head);
        debug!(number = head.number, hash = %head.hash, "snapshot committed");
        Ok(())
    }

    /// Drops a pending layer without committing it.
    pub fn discard(&self, hash: &H256) {
        self.pending.write().remove(hash);
    }

    /// Closes the underlying database.
    pub fn close(&self) -> Result<()> {
        self.pending.write().clear();
        self.db.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_storage::MemoryStore;

    fn fresh() -> SnapshotDb {
        SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap()
    }

    fn h(b: u8) -> H256 {
        H256([b; 32])
    }

    #[test]
    fn commit_advances_head_and_folds_writes() {
        let snap = fresh();
        snap.new_block(1, h(1)).unwrap();
        snap.put(&h(1), b"k", b"v").unwrap();
        // Uncommitted writes are invisible to base reads.
        assert_eq!(snap.get_base(b"k").unwrap(), None);
        snap.commit(&h(1)).unwrap();
        assert_eq!(snap.get_base(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(
            snap.current(),
            Some(SnapshotHead {
                number: 1,
                hash: h(1)
            })
        );
    }

    #[test]
    fn out_of_order_commit_rejected() {
        let snap = fresh();
        snap.new_block(1, h(1)).unwrap();
        snap.commit(&h(1)).unwrap();
        snap.new_block(5, h(5)).unwrap();
        assert!(matches!(
            snap.commit(&h(5)),
            Err(SnapshotError::OutOfOrder { got: 5, head: 1 })
        ));
    }

    #[test]
    fn layered_read_prefers_pending() {
        let snap = fresh();
        snap.new_block(1, h(1)).unwrap();
        snap.put(&h(1), b"k", b"old").unwrap();
        snap.commit(&h(1)).unwrap();

        snap.new_block(2, h(2)).unwrap();
        snap.put(&h(2), b"k", b"new").unwrap();
        assert_eq!(snap.get(Some(&h(2)), b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(snap.get(None, b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn delete_folds_into_base() {
        let snap = fresh();
        snap.put_base(b"gone", b"x").unwrap();
        snap.new_block(1, h(1)).unwrap();
        snap.delete(&h(1), b"gone").unwrap();
        assert_eq!(snap.get(Some(&h(1)), b"gone").unwrap(), None);
        snap.commit(&h(1)).unwrap();
        assert_eq!(snap.get_base(b"gone").unwrap(), None);
    }

    #[test]
    fn head_survives_reopen() {
        let db = Arc::new(MemoryStore::new());
        {
            let snap = SnapshotDb::open(db.clone()).unwrap();
            snap.new_block(1, h(9)).unwrap();
            snap.commit(&h(9)).unwrap();
        }
        let snap = SnapshotDb::open(db).unwrap();
        assert_eq!(snap.current().map(|c| c.number), Some(1));
    }

    #[test]
    fn sentinel_round_trip() {
        let snap = fresh();
        assert_eq!(snap.get_base(FAST_SYNC_STATUS_KEY).unwrap(), None);
        snap.put_base(FAST_SYNC_STATUS_KEY, &[0, 0]).unwrap();
        assert!(snap.get_base(FAST_SYNC_STATUS_KEY).unwrap().is_some());
        snap.delete_base(FAST_SYNC_STATUS_KEY).unwrap();
        assert_eq!(snap.get_base(FAST_SYNC_STATUS_KEY).unwrap(), None);
    }
}
