//! Per-node service context.
//!
//! Owns the data directory layout, the node's signing key, the shared
//! event bus, and the local account manager. Every path a subsystem
//! touches on disk is resolved here so the rest of the node never
//! concatenates directories itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use phoenix_config::DatabaseConfig;
use phoenix_core::{AccountManager, EventBus, NodeKey};
use phoenix_storage::{Database, RocksStore};

use crate::error::Result;

const NODE_KEY_FILE: &str = "nodekey";
const CHAINDATA_DIR: &str = "chaindata";
const GENESIS_FILE: &str = "genesis.json";

/// Shared state every subsystem is constructed against.
pub struct ServiceContext {
    data_dir: PathBuf,
    node_key: NodeKey,
    bus: Arc<EventBus>,
    accounts: Arc<AccountManager>,
}

impl ServiceContext {
    /// Opens a context rooted at `data_dir`, creating the directory and
    /// the node key on first use.
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let node_key = load_or_generate_key(&data_dir.join(NODE_KEY_FILE))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            node_key,
            bus: Arc::new(EventBus::new()),
            accounts: Arc::new(AccountManager::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn node_key(&self) -> &NodeKey {
        &self.node_key
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn accounts(&self) -> &Arc<AccountManager> {
        &self.accounts
    }

    /// Resolves a name relative to the data directory. Absolute input is
    /// returned unchanged.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        let p = Path::new(name);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.data_dir.join(p)
        }
    }

    /// Directory holding the chain database.
    pub fn chaindata_dir(&self) -> PathBuf {
        self.data_dir.join(CHAINDATA_DIR)
    }

    /// Directory of the block freezer. An empty configured value puts it
    /// inside the chain database directory.
    pub fn freezer_dir(&self, config: &DatabaseConfig) -> PathBuf {
        if config.freezer.is_empty() {
            self.chaindata_dir().join("ancient")
        } else {
            self.resolve_path(&config.freezer)
        }
    }

    /// Directory of the state snapshot database.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join(phoenix_snapshotdb::DB_PATH)
    }

    /// Directory of the consensus write-ahead log.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(phoenix_consensus::WAL_PATH)
    }

    /// Well-known location of an operator-supplied genesis file.
    pub fn genesis_path(&self) -> PathBuf {
        self.data_dir.join(GENESIS_FILE)
    }

    /// Opens the chain database with the configured cache budget.
    pub fn open_chain_database(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        let store = RocksStore::open(&self.chaindata_dir(), config.cache_mb, config.handles)?;
        Ok(Arc::new(store))
    }

    /// Opens the backing store of the snapshot database. The snapshot
    /// working set is small, so it gets a fraction of the chain cache.
    pub fn open_snapshot_base(&self, config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
        let cache = (config.cache_mb / 4).max(16);
        let handles = (config.handles / 4).max(16);
        let store = RocksStore::open(&self.snapshot_dir(), cache, handles)?;
        Ok(Arc::new(store))
    }
}

fn load_or_generate_key(path: &Path) -> Result<NodeKey> {
    if path.exists() {
        let raw = fs::read_to_string(path)?;
        return Ok(NodeKey::from_hex(raw.trim())?);
    }
    let key = NodeKey::generate();
    fs::write(path, key.to_hex())?;
    info!(id = %key.node_id(), "generated node key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn node_key_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let first = ServiceContext::new(dir.path()).unwrap();
        let id = first.node_key().node_id();
        drop(first);
        let second = ServiceContext::new(dir.path()).unwrap();
        assert_eq!(second.node_key().node_id(), id);
    }

    #[test]
    fn freezer_defaults_inside_chaindata() {
        let dir = TempDir::new().unwrap();
        let ctx = ServiceContext::new(dir.path()).unwrap();
        let config = DatabaseConfig::default();
        assert_eq!(
            ctx.freezer_dir(&config),
            dir.path().join("chaindata").join("ancient")
        );
        let named = DatabaseConfig {
            freezer: "cold".into(),
            ..DatabaseConfig::default()
        };
        assert_eq!(ctx.freezer_dir(&named), dir.path().join("cold"));
    }

    #[test]
    fn relative_paths_resolve_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let ctx = ServiceContext::new(dir.path()).unwrap();
        assert_eq!(ctx.resolve_path("journal"), dir.path().join("journal"));
        assert_eq!(ctx.resolve_path("/abs/journal"), PathBuf::from("/abs/journal"));
    }
}
