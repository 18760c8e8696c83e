//! RocksDB-backed database.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, Direction, IteratorMode, Options, DB,
};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::kv::{BatchOp, Database, WriteBatch};

/// A [`Database`] backed by RocksDB.
///
/// The handle wraps the database in a lock so `close` can drop it while
/// other holders of the `Arc` still exist; their calls then fail with
/// [`StorageError::Closed`].
pub struct RocksStore {
    db: RwLock<Option<DB>>,
    path: PathBuf,
}

impl RocksStore {
    /// Opens (creating if missing) a database at `path`.
    ///
    /// `cache_mb` sizes the shared block cache, `handles` bounds open
    /// file descriptors.
    pub fn open(path: &Path, cache_mb: usize, handles: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(handles as i32);
        opts.set_compression_type(DBCompressionType::Lz4);
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(2);
        opts.increase_parallelism(parallelism);

        let cache = Cache::new_lru_cache(cache_mb.max(1) * 1024 * 1024);
        let mut table_opts = BlockBasedOptions::default();
        table_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&table_opts);

        let db = DB::open(&opts, path)?;
        debug!(path = %path.display(), cache_mb, handles, "opened rocksdb");
        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path.to_path_buf(),
        })
    }

    /// Directory this database lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Database for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        db.put(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        db.delete(key)?;
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let mut native = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => native.put(key, value),
                BatchOp::Delete { key } => native.delete(key),
            }
        }
        db.write(native)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let mut out = Vec::new();
        let iter = db.iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.db.write();
        if let Some(db) = guard.take() {
            db.flush()?;
            debug!(path = %self.path.display(), "closed rocksdb");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = RocksStore::open(&path, 8, 16).unwrap();
            db.put(b"head", b"42").unwrap();
            db.close().unwrap();
        }
        let db = RocksStore::open(&path, 8, 16).unwrap();
        assert_eq!(db.get(b"head").unwrap(), Some(b"42".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn close_releases_directory_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = RocksStore::open(&path, 8, 16).unwrap();
        db.close().unwrap();
        // A second open would fail if the first still held the lock.
        let again = RocksStore::open(&path, 8, 16).unwrap();
        again.close().unwrap();
    }

    #[test]
    fn operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let db = RocksStore::open(&dir.path().join("db"), 8, 16).unwrap();
        db.close().unwrap();
        assert!(matches!(db.get(b"x"), Err(StorageError::Closed)));
    }

    #[test]
    fn batch_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let db = RocksStore::open(&dir.path().join("db"), 8, 16).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"b:1".as_slice(), b"one".as_slice());
        batch.put(b"b:2".as_slice(), b"two".as_slice());
        batch.put(b"c:1".as_slice(), b"other".as_slice());
        db.write(batch).unwrap();
        let hits = db.scan_prefix(b"b:").unwrap();
        assert_eq!(hits.len(), 2);
        db.close().unwrap();
    }
}
