//! The canonical block chain.
//!
//! Inserted blocks extend a linear chain; a competing block at the head
//! height only displaces the current head when the preserve predicate
//! lets it go. The snapshot database travels with the chain and is
//! closed by [`BlockChain::stop`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use phoenix_config::ChainConfig;
use phoenix_consensus::ConsensusEngine;
use phoenix_core::{Block, ChainReader, EventBus, Header, NodeEvent, H256};
use phoenix_snapshotdb::SnapshotDb;
use phoenix_storage::Database;

use crate::error::{LedgerError, Result};
use crate::rawdb;

/// Predicate deciding whether a canonical block is protected from
/// displacement. Wired to "was this block authored locally".
pub type ShouldPreserve = Arc<dyn Fn(&Block) -> bool + Send + Sync>;

/// Cache sizing for the chain structures.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub header_cache: usize,
    pub block_cache: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            header_cache: 512,
            block_cache: 256,
        }
    }
}

/// What an insert did to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block became the new head.
    Extended,
    /// The block displaced the previous head at the same height.
    Reorged,
    /// The block was stored off the canonical chain.
    SideChain,
    /// The block is already the head.
    AlreadyKnown,
}

pub struct BlockChain {
    db: Arc<dyn Database>,
    snapshot: Arc<SnapshotDb>,
    config: ChainConfig,
    engine: Arc<dyn ConsensusEngine>,
    should_preserve: ShouldPreserve,
    bus: Arc<EventBus>,
    genesis_hash: H256,
    head: RwLock<Block>,
    header_cache: Mutex<LruCache<H256, Header>>,
    block_cache: Mutex<LruCache<H256, Block>>,
    stopped: AtomicBool,
}

impl BlockChain {
    /// Loads the chain from an initialized database. Genesis setup must
    /// have run first.
    pub fn new(
        db: Arc<dyn Database>,
        snapshot: Arc<SnapshotDb>,
        cache: CacheConfig,
        config: ChainConfig,
        engine: Arc<dyn ConsensusEngine>,
        should_preserve: ShouldPreserve,
        bus: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        let head_hash = rawdb::read_head_header_hash(db.as_ref())?.ok_or(LedgerError::NoHead)?;
        let head = rawdb::read_block(db.as_ref(), &head_hash)?.ok_or(LedgerError::NoHead)?;
        let genesis_hash =
            rawdb::read_canonical_hash(db.as_ref(), 0)?.ok_or(LedgerError::NoHead)?;

        let header_cache = NonZeroUsize::new(cache.header_cache.max(1))
            .map(LruCache::new)
            .ok_or_else(|| LedgerError::Encoding("cache size".into()))?;
        let block_cache = NonZeroUsize::new(cache.block_cache.max(1))
            .map(LruCache::new)
            .ok_or_else(|| LedgerError::Encoding("cache size".into()))?;

        info!(
            head = head.number(),
            genesis = %genesis_hash,
            chain_id = config.chain_id,
            "block chain loaded"
        );
        Ok(Arc::new(Self {
            db,
            snapshot,
            config,
            engine,
            should_preserve,
            bus,
            genesis_hash,
            head: RwLock::new(head),
            header_cache: Mutex::new(header_cache),
            block_cache: Mutex::new(block_cache),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn genesis_hash(&self) -> H256 {
        self.genesis_hash
    }

    pub fn snapshot(&self) -> &Arc<SnapshotDb> {
        &self.snapshot
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    fn set_head(&self, block: Block) -> Result<()> {
        rawdb::write_canonical_block(self.db.as_ref(), &block)?;
        self.block_cache.lock().put(block.hash(), block.clone());
        self.header_cache
            .lock()
            .put(block.hash(), block.header.clone());
        *self.head.write() = block.clone();
        let _ = self.bus.post(NodeEvent::NewChainHead(block));
        Ok(())
    }

    /// Inserts a verified block.
    pub fn insert_block(&self, block: Block) -> Result<InsertOutcome> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(LedgerError::Stopped);
        }
        self.engine.verify_header(&block.header)?;

        let head = self.current_block();
        if block.hash() == head.hash() {
            return Ok(InsertOutcome::AlreadyKnown);
        }

        // The common case: the block extends the head.
        if block.number() == head.number() + 1 && block.parent_hash() == head.hash() {
            debug!(number = block.number(), hash = %block.hash(), "chain extended");
            self.set_head(block)?;
            return Ok(InsertOutcome::Extended);
        }

        // A competitor for the current head height.
        if block.number() == head.number() && block.parent_hash() == head.parent_hash() {
            if (self.should_preserve)(&head) {
                warn!(
                    number = block.number(),
                    "keeping locally sealed head over competing block"
                );
                self.store_side_block(&block)?;
                return Ok(InsertOutcome::SideChain);
            }
            info!(number = block.number(), hash = %block.hash(), "head displaced");
            self.set_head(block)?;
            return Ok(InsertOutcome::Reorged);
        }

        // Anything older goes in as a side block if we know its parent.
        if block.number() <= head.number() {
            if self.get_header_by_hash(&block.parent_hash()).is_none() {
                return Err(LedgerError::UnknownAncestor {
                    number: block.number(),
                    parent: block.parent_hash(),
                });
            }
            self.store_side_block(&block)?;
            return Ok(InsertOutcome::SideChain);
        }

        Err(LedgerError::UnknownAncestor {
            number: block.number(),
            parent: block.parent_hash(),
        })
    }

    fn store_side_block(&self, block: &Block) -> Result<()> {
        rawdb::write_block(self.db.as_ref(), block)?;
        self.block_cache.lock().put(block.hash(), block.clone());
        Ok(())
    }

    /// Stops the chain and closes the snapshot database riding with it.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.snapshot.close()?;
        info!(head = self.current_header().number, "block chain stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl ChainReader for BlockChain {
    fn current_header(&self) -> Header {
        self.head.read().header.clone()
    }

    fn current_block(&self) -> Block {
        self.head.read().clone()
    }

    fn get_block_by_number(&self, number: u64) -> Option<Block> {
        rawdb::read_canonical_block(self.db.as_ref(), number)
            .ok()
            .flatten()
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        rawdb::read_canonical_header(self.db.as_ref(), number)
            .ok()
            .flatten()
    }

    fn get_header_by_hash(&self, hash: &H256) -> Option<Header> {
        if let Some(header) = self.header_cache.lock().get(hash) {
            return Some(header.clone());
        }
        let header = rawdb::read_header(self.db.as_ref(), hash).ok().flatten()?;
        self.header_cache.lock().put(*hash, header.clone());
        Some(header)
    }
}
