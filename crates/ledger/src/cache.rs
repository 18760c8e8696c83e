//! Execution cache layered over the canonical chain.
//!
//! The cache owns the seam between block storage and state execution: the
//! consensus engine and the snapshot recovery path both drive blocks through
//! [`BlockChainCache::execute_block`], which delegates to whatever
//! [`BlockExecutor`] the node installed. Executed hashes are memoized so a
//! block replayed from the write-ahead log is not executed twice.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use phoenix_core::{Block, ChainCache, ChainReader, ExecutionError, Header, H256};
use phoenix_snapshotdb::SnapshotDb;
use tracing::{debug, info};

use crate::chain::BlockChain;
use crate::error::{LedgerError, Result};

/// Number of recent executions kept in the memo before old entries are pruned.
const EXECUTED_MEMO_LIMIT: usize = 1024;

/// Applies a block's transactions on top of its parent's state.
///
/// Implementations are expected to open a pending snapshot layer keyed by the
/// block's hash and leave it uncommitted; committing (or discarding) the layer
/// is the caller's decision.
pub trait BlockExecutor: Send + Sync {
    fn execute(&self, block: &Block, parent: &Header) -> std::result::Result<(), ExecutionError>;
}

/// Chain reader with an execution seam.
pub struct BlockChainCache {
    chain: Arc<BlockChain>,
    executor: RwLock<Option<Arc<dyn BlockExecutor>>>,
    executed: DashMap<H256, u64>,
}

impl BlockChainCache {
    pub fn new(chain: Arc<BlockChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            executor: RwLock::new(None),
            executed: DashMap::new(),
        })
    }

    /// Installs the executor used by [`ChainCache::execute_block`].
    pub fn set_executor(&self, executor: Arc<dyn BlockExecutor>) {
        *self.executor.write() = Some(executor);
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    /// Whether the block has already gone through execution.
    pub fn is_executed(&self, hash: &H256) -> bool {
        self.executed.contains_key(hash)
    }

    fn prune_memo(&self, head: u64) {
        if self.executed.len() <= EXECUTED_MEMO_LIMIT {
            return;
        }
        let horizon = head.saturating_sub(EXECUTED_MEMO_LIMIT as u64);
        self.executed.retain(|_, number| *number >= horizon);
    }
}

impl ChainReader for BlockChainCache {
    fn current_header(&self) -> Header {
        self.chain.current_header()
    }

    fn current_block(&self) -> Block {
        self.chain.current_block()
    }

    fn get_block_by_number(&self, number: u64) -> Option<Block> {
        self.chain.get_block_by_number(number)
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.chain.get_header_by_number(number)
    }

    fn get_header_by_hash(&self, hash: &H256) -> Option<Header> {
        self.chain.get_header_by_hash(hash)
    }
}

impl ChainCache for BlockChainCache {
    fn execute_block(
        &self,
        block: &Block,
        parent: &Header,
    ) -> std::result::Result<(), ExecutionError> {
        let hash = block.hash();
        if self.executed.contains_key(&hash) {
            debug!(number = block.number(), %hash, "block already executed, skipping");
            return Ok(());
        }
        let executor = self.executor.read().clone().ok_or(ExecutionError::Execute {
            number: block.number(),
            hash,
            reason: "no block executor installed".into(),
        })?;
        executor.execute(block, parent)?;
        self.executed.insert(hash, block.number());
        self.prune_memo(block.number());
        Ok(())
    }
}

/// Replays canonical blocks the snapshot database has not yet absorbed.
///
/// When the node shut down between writing a block and committing its snapshot
/// layer the two databases disagree on the head. This walks every canonical
/// block past the snapshot's base, executes it through the cache and commits
/// the resulting layer, leaving both databases at the same height.
pub fn recover_snapshot_db(cache: &BlockChainCache, snapshot: &SnapshotDb) -> Result<()> {
    let chain_head = cache.current_header().number;
    let base = snapshot.current().map(|head| head.number).unwrap_or(0);
    if base > chain_head {
        return Err(LedgerError::SnapshotAhead {
            snapshot: base,
            chain: chain_head,
        });
    }
    if base == chain_head {
        return Ok(());
    }
    info!(
        snapshot = base,
        chain = chain_head,
        "snapshot database behind chain, replaying missed blocks"
    );
    for number in base + 1..=chain_head {
        let block = cache
            .get_block_by_number(number)
            .ok_or(ExecutionError::MissingBlock { number })?;
        let parent = cache
            .get_header_by_number(number - 1)
            .ok_or(ExecutionError::MissingBlock { number: number - 1 })?;
        cache.execute_block(&block, &parent)?;
        snapshot.commit(&block.hash())?;
        debug!(number, hash = %block.hash(), "replayed block into snapshot database");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use phoenix_consensus::{Agency, ProtocolSpec};
    use phoenix_core::{Address, ApiDescriptor, EventBus, TxPoolApi};
    use phoenix_storage::{Database, MemoryStore};

    use crate::chain::{BlockChain, CacheConfig, ShouldPreserve};
    use crate::genesis::setup_genesis_block;

    struct NopEngine;

    #[async_trait]
    impl phoenix_consensus::ConsensusEngine for NopEngine {
        fn author(&self, _: &Header) -> phoenix_consensus::Result<Address> {
            Ok(Address::ZERO)
        }
        fn verify_header(&self, _: &Header) -> phoenix_consensus::Result<()> {
            Ok(())
        }
        async fn start(
            &self,
            _: Arc<dyn ChainReader>,
            _: Arc<dyn ChainCache>,
            _: Arc<dyn TxPoolApi>,
            _: Agency,
        ) -> phoenix_consensus::Result<()> {
            Ok(())
        }
        async fn close(&self) -> phoenix_consensus::Result<()> {
            Ok(())
        }
        fn protocols(&self) -> Vec<ProtocolSpec> {
            Vec::new()
        }
        fn apis(&self) -> Vec<ApiDescriptor> {
            Vec::new()
        }
    }

    struct RecordingExecutor {
        snapshot: Arc<SnapshotDb>,
        executed: Mutex<Vec<u64>>,
    }

    impl BlockExecutor for RecordingExecutor {
        fn execute(
            &self,
            block: &Block,
            _parent: &Header,
        ) -> std::result::Result<(), ExecutionError> {
            self.snapshot
                .new_block(block.number(), block.hash())
                .map_err(|e| ExecutionError::Execute {
                    number: block.number(),
                    hash: block.hash(),
                    reason: e.to_string(),
                })?;
            self.executed.lock().unwrap().push(block.number());
            Ok(())
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    impl BlockExecutor for CountingExecutor {
        fn execute(
            &self,
            _: &Block,
            _: &Header,
        ) -> std::result::Result<(), ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn build_chain() -> (Arc<BlockChain>, Arc<SnapshotDb>) {
        let db: Arc<dyn Database> = Arc::new(MemoryStore::new());
        let spec = phoenix_config::GenesisSpec::default_private();
        setup_genesis_block(db.as_ref(), Some(&spec)).unwrap();
        let snapshot = Arc::new(SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap());
        let preserve: ShouldPreserve = Arc::new(|_| false);
        let chain = BlockChain::new(
            db,
            snapshot.clone(),
            CacheConfig::default(),
            spec.config.clone(),
            Arc::new(NopEngine),
            preserve,
            Arc::new(EventBus::new()),
        )
        .unwrap();
        (chain, snapshot)
    }

    fn extend(chain: &Arc<BlockChain>, count: u64) -> Vec<Block> {
        let mut blocks = Vec::new();
        for _ in 0..count {
            let parent = chain.current_header();
            let block = Block::new(
                Header {
                    parent_hash: parent.hash(),
                    number: parent.number + 1,
                    timestamp: parent.timestamp + 1_000,
                    coinbase: Address::ZERO,
                    state_root: H256::zero(),
                    tx_root: H256::zero(),
                    gas_limit: parent.gas_limit,
                    gas_used: 0,
                    extra: Vec::new(),
                },
                Vec::new(),
            );
            chain.insert_block(block.clone()).unwrap();
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn execute_without_executor_fails() {
        let (chain, _snapshot) = build_chain();
        let cache = BlockChainCache::new(chain.clone());
        let blocks = extend(&chain, 1);
        let parent = cache.get_header_by_number(0).unwrap();
        let err = cache.execute_block(&blocks[0], &parent).unwrap_err();
        assert!(matches!(err, ExecutionError::Execute { .. }));
    }

    #[test]
    fn execution_is_memoized() {
        let (chain, _snapshot) = build_chain();
        let cache = BlockChainCache::new(chain.clone());
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        cache.set_executor(executor.clone());

        let blocks = extend(&chain, 1);
        let parent = cache.get_header_by_number(0).unwrap();
        cache.execute_block(&blocks[0], &parent).unwrap();
        cache.execute_block(&blocks[0], &parent).unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_executed(&blocks[0].hash()));
    }

    #[test]
    fn snapshot_recovery_replays_missing_blocks() {
        let (chain, snapshot) = build_chain();
        let cache = BlockChainCache::new(chain.clone());
        let executor = Arc::new(RecordingExecutor {
            snapshot: snapshot.clone(),
            executed: Mutex::new(Vec::new()),
        });
        cache.set_executor(executor.clone());

        let blocks = extend(&chain, 5);
        // The snapshot store only absorbed the first two blocks.
        for block in &blocks[..2] {
            snapshot.new_block(block.number(), block.hash()).unwrap();
            snapshot.commit(&block.hash()).unwrap();
        }
        executor.executed.lock().unwrap().clear();

        recover_snapshot_db(&cache, &snapshot).unwrap();

        assert_eq!(*executor.executed.lock().unwrap(), vec![3, 4, 5]);
        let head = snapshot.current().unwrap();
        assert_eq!(head.number, 5);
        assert_eq!(head.hash, blocks[4].hash());
    }

    #[test]
    fn snapshot_recovery_is_noop_when_caught_up() {
        let (chain, snapshot) = build_chain();
        let cache = BlockChainCache::new(chain.clone());
        let executor = Arc::new(RecordingExecutor {
            snapshot: snapshot.clone(),
            executed: Mutex::new(Vec::new()),
        });
        cache.set_executor(executor.clone());

        let blocks = extend(&chain, 2);
        for block in &blocks {
            snapshot.new_block(block.number(), block.hash()).unwrap();
            snapshot.commit(&block.hash()).unwrap();
        }
        executor.executed.lock().unwrap().clear();

        recover_snapshot_db(&cache, &snapshot).unwrap();
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[test]
    fn snapshot_ahead_of_chain_is_rejected() {
        let (chain, snapshot) = build_chain();
        let cache = BlockChainCache::new(chain.clone());
        let blocks = extend(&chain, 1);
        snapshot.new_block(1, blocks[0].hash()).unwrap();
        snapshot.commit(&blocks[0].hash()).unwrap();
        for number in 2..=3u64 {
            let phantom = H256::hash_of(&number.to_le_bytes());
            snapshot.new_block(number, phantom).unwrap();
            snapshot.commit(&phantom).unwrap();
        }

        let err = recover_snapshot_db(&cache, &snapshot).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::SnapshotAhead {
                snapshot: 3,
                chain: 1
            }
        ));
    }
}
