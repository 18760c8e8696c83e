//! Transaction pool feeding the sealer.
//!
//! Locally submitted transactions are journaled so they survive restarts;
//! remote transactions pass a price gate and are only taken at all once the
//! node flips the accept switch after sync (or when it starts sealing).
//! Pruning after block import is driven by the importer, the pool keeps no
//! background task of its own.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use phoenix_config::TxPoolConfig;
use phoenix_core::{Address, Block, ChainReader, Transaction, TxPoolApi, H256};

use crate::error::{LedgerError, Result};

struct PooledTx {
    tx: Transaction,
    local: bool,
    added_at: Instant,
}

/// Length-prefixed journal of locally submitted transactions.
struct Journal {
    path: PathBuf,
    file: Option<File>,
}

impl Journal {
    fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Reads back every complete transaction frame, dropping a truncated
    /// tail the way a crash mid-append leaves one.
    fn load(&self) -> Vec<Transaction> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let mut txs = Vec::new();
        let mut cursor = &raw[..];
        loop {
            let mut len_buf = [0u8; 4];
            if cursor.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if cursor.len() < len {
                warn!(path = %self.path.display(), "dropping truncated journal tail");
                break;
            }
            match bincode::deserialize::<Transaction>(&cursor[..len]) {
                Ok(tx) => txs.push(tx),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping bad journal frame");
                }
            }
            cursor = &cursor[len..];
        }
        txs
    }

    fn append(&mut self, tx: &Transaction) -> Result<()> {
        let file = self.file.as_mut().ok_or(LedgerError::Stopped)?;
        let encoded =
            bincode::serialize(tx).map_err(|e| LedgerError::Encoding(e.to_string()))?;
        let len = (encoded.len() as u32).to_le_bytes();
        file.write_all(&len)?;
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    }

    /// Rewrites the journal to hold exactly `txs`, dropping stale frames.
    fn rotate(&mut self, txs: &[Transaction]) -> Result<()> {
        let tmp = self.path.with_extension("new");
        {
            let mut out = File::create(&tmp)?;
            for tx in txs {
                let encoded =
                    bincode::serialize(tx).map_err(|e| LedgerError::Encoding(e.to_string()))?;
                out.write_all(&(encoded.len() as u32).to_le_bytes())?;
                out.write_all(&encoded)?;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        self.file = Some(OpenOptions::new().append(true).open(&self.path)?);
        debug!(path = %self.path.display(), count = txs.len(), "journal rotated");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Pool of pending transactions, keyed by sender and nonce.
pub struct TxPool {
    config: TxPoolConfig,
    chain: Arc<dyn ChainReader>,
    min_gas_price: RwLock<u64>,
    accept_remotes: AtomicBool,
    all: DashMap<H256, PooledTx>,
    queues: RwLock<BTreeMap<Address, BTreeMap<u64, H256>>>,
    local_senders: RwLock<HashSet<Address>>,
    journal: Mutex<Option<Journal>>,
    last_rotate: Mutex<Instant>,
    stopped: AtomicBool,
}

impl TxPool {
    /// Creates the pool and replays the journal when one is configured.
    /// Journaled transactions come back as locals.
    pub fn new(
        config: TxPoolConfig,
        chain: Arc<dyn ChainReader>,
        journal_path: Option<PathBuf>,
    ) -> Result<Arc<Self>> {
        let journal = match journal_path {
            Some(path) => Some(Journal::open(path)?),
            None => None,
        };
        let pool = Arc::new(Self {
            min_gas_price: RwLock::new(config.price_limit),
            config,
            chain,
            accept_remotes: AtomicBool::new(false),
            all: DashMap::new(),
            queues: RwLock::new(BTreeMap::new()),
            local_senders: RwLock::new(HashSet::new()),
            journal: Mutex::new(journal),
            last_rotate: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
        });

        let replayed = {
            let guard = pool.journal.lock();
            guard.as_ref().map(|j| j.load()).unwrap_or_default()
        };
        if !replayed.is_empty() {
            let mut restored = 0usize;
            for tx in replayed {
                // Already journaled, no need to append again.
                if pool.insert(tx, true).is_ok() {
                    restored += 1;
                }
            }
            info!(restored, "transaction journal replayed");
        }
        Ok(pool)
    }

    /// The minimum gas price currently enforced on remote transactions.
    pub fn gas_price(&self) -> u64 {
        *self.min_gas_price.read()
    }

    /// Raises or lowers the remote price gate and drops remotes that no
    /// longer clear it. Locals are never price-dropped.
    pub fn set_gas_price(&self, price: u64) {
        *self.min_gas_price.write() = price;
        let doomed: Vec<H256> = self
            .all
            .iter()
            .filter(|entry| !entry.local && entry.tx.gas_price < price)
            .map(|entry| *entry.key())
            .collect();
        for hash in &doomed {
            self.remove(hash);
        }
        info!(price, dropped = doomed.len(), "transaction pool price updated");
    }

    /// Flips whether remote transactions are taken at all.
    pub fn set_accept_remotes(&self, accept: bool) {
        self.accept_remotes.store(accept, Ordering::Release);
    }

    /// Adds a locally submitted transaction. Locals bypass the price gate
    /// and the capacity limits, and are journaled.
    pub fn add_local(&self, tx: Transaction) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(LedgerError::Stopped);
        }
        self.validate(&tx, true)?;
        self.insert(tx.clone(), true)?;
        let mut guard = self.journal.lock();
        if let Some(journal) = guard.as_mut() {
            journal.append(&tx)?;
        }
        drop(guard);
        self.maybe_rotate();
        Ok(())
    }

    /// Adds one remote transaction, enforcing the price gate and pool
    /// capacity.
    pub fn add_remote(&self, tx: Transaction) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(LedgerError::Stopped);
        }
        self.validate(&tx, false)?;
        self.insert(tx, false)
    }

    fn validate(&self, tx: &Transaction, local: bool) -> Result<()> {
        let limit = self.chain.current_header().gas_limit;
        if tx.gas > limit {
            return Err(LedgerError::GasOverLimit { got: tx.gas, limit });
        }
        if !local {
            let min = self.gas_price();
            if tx.gas_price < min {
                return Err(LedgerError::Underpriced {
                    got: tx.gas_price,
                    min,
                });
            }
            if self.all.len() >= self.config.global_slots {
                return Err(LedgerError::PoolFull);
            }
        }
        Ok(())
    }

    fn insert(&self, tx: Transaction, local: bool) -> Result<()> {
        let hash = tx.hash();
        if self.all.contains_key(&hash) {
            return Err(LedgerError::KnownTransaction(hash));
        }

        let mut queues = self.queues.write();
        let queue = queues.entry(tx.from).or_default();
        if let Some(old_hash) = queue.get(&tx.nonce).copied() {
            // Same sender and nonce: only a better-paying replacement wins.
            let old_price = self.all.get(&old_hash).map(|e| e.tx.gas_price).unwrap_or(0);
            if tx.gas_price <= old_price {
                return Err(LedgerError::ReplaceUnderpriced);
            }
            self.all.remove(&old_hash);
        } else if !local && queue.len() >= self.config.account_slots {
            return Err(LedgerError::PoolFull);
        }
        queue.insert(tx.nonce, hash);
        drop(queues);

        if local {
            self.local_senders.write().insert(tx.from);
        }
        debug!(%hash, from = %tx.from, nonce = tx.nonce, local, "transaction pooled");
        self.all.insert(
            hash,
            PooledTx {
                tx,
                local,
                added_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn remove(&self, hash: &H256) {
        if let Some((_, pooled)) = self.all.remove(hash) {
            let mut queues = self.queues.write();
            if let Some(queue) = queues.get_mut(&pooled.tx.from) {
                queue.remove(&pooled.tx.nonce);
                if queue.is_empty() {
                    queues.remove(&pooled.tx.from);
                }
            }
        }
    }

    /// Drops transactions made stale by an imported block: everything the
    /// block included, plus lower-nonce leftovers per sender.
    pub fn prune_included(&self, block: &Block) {
        let mut dropped = 0usize;
        for tx in &block.transactions {
            let doomed: Vec<H256> = {
                let queues = self.queues.read();
                match queues.get(&tx.from) {
                    Some(queue) => queue
                        .range(..=tx.nonce)
                        .map(|(_, hash)| *hash)
                        .collect(),
                    None => Vec::new(),
                }
            };
            for hash in doomed {
                self.remove(&hash);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(number = block.number(), dropped, "pool pruned after import");
        }
    }

    fn evict_stale(&self) {
        let lifetime = self.config.lifetime;
        let doomed: Vec<H256> = self
            .all
            .iter()
            .filter(|entry| !entry.local && entry.added_at.elapsed() > lifetime)
            .map(|entry| *entry.key())
            .collect();
        for hash in &doomed {
            self.remove(hash);
        }
        if !doomed.is_empty() {
            debug!(evicted = doomed.len(), "stale remote transactions evicted");
        }
    }

    fn maybe_rotate(&self) {
        let mut last = self.last_rotate.lock();
        if last.elapsed() < self.config.rejournal {
            return;
        }
        *last = Instant::now();
        drop(last);
        if let Err(e) = self.rotate_journal() {
            warn!(error = %e, "journal rotation failed");
        }
    }

    fn rotate_journal(&self) -> Result<()> {
        let locals: Vec<Transaction> = self
            .all
            .iter()
            .filter(|entry| entry.local)
            .map(|entry| entry.tx.clone())
            .collect();
        let mut guard = self.journal.lock();
        if let Some(journal) = guard.as_mut() {
            journal.rotate(&locals)?;
        }
        Ok(())
    }

    /// Rotates the journal one last time and closes it. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.rotate_journal()?;
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.close()?;
        }
        info!(pooled = self.all.len(), "transaction pool stopped");
        Ok(())
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

impl TxPoolApi for TxPool {
    /// Pending transactions in execution order: senders by address, each
    /// sender's run contiguous in nonce starting from its lowest pooled one.
    fn pending(&self) -> Vec<Transaction> {
        self.evict_stale();
        let queues = self.queues.read();
        let mut out = Vec::new();
        for queue in queues.values() {
            let mut expected: Option<u64> = None;
            for (&nonce, hash) in queue.iter() {
                if let Some(want) = expected {
                    if nonce != want {
                        break;
                    }
                }
                if let Some(entry) = self.all.get(hash) {
                    out.push(entry.tx.clone());
                }
                expected = Some(nonce + 1);
            }
        }
        out
    }

    fn add_remotes(&self, txs: Vec<Transaction>) {
        if !self.accepts_remotes() {
            debug!(count = txs.len(), "remote transactions dropped, pool not accepting");
            return;
        }
        self.evict_stale();
        let mut rejected = 0usize;
        for tx in txs {
            if let Err(e) = self.add_remote(tx) {
                debug!(error = %e, "remote transaction rejected");
                rejected += 1;
            }
        }
        if rejected > 0 {
            debug!(rejected, "remote transactions rejected");
        }
    }

    fn accepts_remotes(&self) -> bool {
        self.accept_remotes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::Header;

    struct StaticChain;

    impl ChainReader for StaticChain {
        fn current_header(&self) -> Header {
            Header {
                parent_hash: H256::zero(),
                number: 0,
                timestamp: 0,
                coinbase: Address::ZERO,
                state_root: H256::zero(),
                tx_root: H256::zero(),
                gas_limit: 10_000_000,
                gas_used: 0,
                extra: Vec::new(),
            }
        }
        fn current_block(&self) -> Block {
            Block::new(self.current_header(), Vec::new())
        }
        fn get_block_by_number(&self, _: u64) -> Option<Block> {
            None
        }
        fn get_header_by_number(&self, _: u64) -> Option<Header> {
            None
        }
        fn get_header_by_hash(&self, _: &H256) -> Option<Header> {
            None
        }
    }

    fn tx(from: u8, nonce: u64, gas_price: u64) -> Transaction {
        Transaction {
            from: Address([from; 20]),
            to: Some(Address([0xff; 20])),
            nonce,
            gas: 21_000,
            gas_price,
            value: 1,
            input: Vec::new(),
        }
    }

    fn pool() -> Arc<TxPool> {
        TxPool::new(TxPoolConfig::default(), Arc::new(StaticChain), None).unwrap()
    }

    #[test]
    fn remotes_gated_until_accepting() {
        let pool = pool();
        assert!(!pool.accepts_remotes());
        pool.add_remotes(vec![tx(1, 0, 100)]);
        assert!(pool.is_empty());

        pool.set_accept_remotes(true);
        pool.add_remotes(vec![tx(1, 0, 100)]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn underpriced_remote_rejected_local_exempt() {
        let pool = pool();
        pool.set_gas_price(50);
        assert!(matches!(
            pool.add_remote(tx(1, 0, 10)),
            Err(LedgerError::Underpriced { got: 10, min: 50 })
        ));
        pool.add_local(tx(1, 0, 10)).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pending_is_nonce_ordered_and_stops_at_gaps() {
        let pool = pool();
        pool.add_local(tx(1, 2, 100)).unwrap();
        pool.add_local(tx(1, 0, 100)).unwrap();
        pool.add_local(tx(1, 1, 100)).unwrap();
        pool.add_local(tx(1, 5, 100)).unwrap();
        let nonces: Vec<u64> = pool.pending().iter().map(|t| t.nonce).collect();
        // Nonce 5 sits behind the 3..=4 gap.
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[test]
    fn replacement_needs_higher_price() {
        let pool = pool();
        pool.add_local(tx(1, 0, 100)).unwrap();
        assert!(matches!(
            pool.add_local(tx(1, 0, 100)),
            Err(LedgerError::ReplaceUnderpriced)
        ));
        pool.add_local(tx(1, 0, 101)).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pending()[0].gas_price, 101);
    }

    #[test]
    fn duplicate_rejected() {
        let pool = pool();
        let t = tx(1, 0, 100);
        pool.add_local(t.clone()).unwrap();
        assert!(matches!(
            pool.add_local(t),
            Err(LedgerError::KnownTransaction(_))
        ));
    }

    #[test]
    fn gas_above_block_limit_rejected() {
        let pool = pool();
        let mut t = tx(1, 0, 100);
        t.gas = 50_000_000;
        assert!(matches!(
            pool.add_local(t),
            Err(LedgerError::GasOverLimit { .. })
        ));
    }

    #[test]
    fn prune_drops_included_and_lower_nonces() {
        let pool = pool();
        for nonce in 0..4 {
            pool.add_local(tx(1, nonce, 100)).unwrap();
        }
        pool.add_local(tx(2, 0, 100)).unwrap();

        let block = Block::new(
            Header {
                parent_hash: H256::zero(),
                number: 1,
                timestamp: 0,
                coinbase: Address::ZERO,
                state_root: H256::zero(),
                tx_root: H256::zero(),
                gas_limit: 10_000_000,
                gas_used: 0,
                extra: Vec::new(),
            },
            vec![tx(1, 2, 100)],
        );
        pool.prune_included(&block);

        let nonces: Vec<u64> = pool.pending().iter().map(|t| t.nonce).collect();
        // Sender 1 keeps only nonce 3; sender 2 untouched.
        assert_eq!(nonces, vec![3, 0]);
    }

    #[test]
    fn price_bump_drops_remotes_keeps_locals() {
        let pool = pool();
        pool.set_accept_remotes(true);
        pool.add_remote(tx(1, 0, 10)).unwrap();
        pool.add_local(tx(2, 0, 10)).unwrap();
        pool.set_gas_price(100);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pending()[0].from, Address([2; 20]));
    }

    #[test]
    fn journal_restores_locals_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.journal");

        let pool =
            TxPool::new(TxPoolConfig::default(), Arc::new(StaticChain), Some(path.clone()))
                .unwrap();
        pool.add_local(tx(1, 0, 100)).unwrap();
        pool.add_local(tx(1, 1, 100)).unwrap();
        pool.stop().unwrap();
        pool.stop().unwrap();

        let pool =
            TxPool::new(TxPoolConfig::default(), Arc::new(StaticChain), Some(path)).unwrap();
        let nonces: Vec<u64> = pool.pending().iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[test]
    fn stopped_pool_rejects_additions() {
        let pool = pool();
        pool.stop().unwrap();
        assert!(matches!(
            pool.add_local(tx(1, 0, 100)),
            Err(LedgerError::Stopped)
        ));
    }
}
