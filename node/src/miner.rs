//! Block sealing.
//!
//! The miner collects pending transactions, asks the engine to seal, and
//! lands the result: execute into a snapshot layer, insert into the chain,
//! commit the layer, confirm with the engine, prune the pool. A failure
//! at any point discards the layer so the snapshot never holds work for a
//! block that did not land.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use phoenix_config::MinerConfig;
use phoenix_consensus::Pbft;
use phoenix_core::{Address, Block, ChainCache, Header, TxPoolApi, H256};
use phoenix_ledger::{BlockChain, BlockChainCache, InsertOutcome, TxPool};

use crate::error::Result;

pub struct Miner {
    chain: Arc<BlockChain>,
    cache: Arc<BlockChainCache>,
    pool: Arc<TxPool>,
    engine: Arc<Pbft>,
    config: MinerConfig,
    mining_address: Arc<RwLock<Address>>,
    mining: AtomicBool,
    sealer: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Miner {
    pub fn new(
        chain: Arc<BlockChain>,
        cache: Arc<BlockChainCache>,
        pool: Arc<TxPool>,
        engine: Arc<Pbft>,
        config: MinerConfig,
        mining_address: Arc<RwLock<Address>>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            chain,
            cache,
            pool,
            engine,
            config,
            mining_address,
            mining: AtomicBool::new(false),
            sealer: Mutex::new(None),
            shutdown,
        })
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::Acquire)
    }

    pub fn mining_address(&self) -> Address {
        *self.mining_address.read()
    }

    pub fn set_mining_address(&self, address: Address) {
        *self.mining_address.write() = address;
    }

    /// Spawns the sealing loop. Harmless when already running.
    pub fn start(self: &Arc<Self>) {
        if self.mining.swap(true, Ordering::AcqRel) {
            return;
        }
        let miner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let recommit = self.config.recommit;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(recommit);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = miner.seal_pending() {
                            warn!(error = %e, "sealing round failed");
                        }
                    }
                }
            }
        });
        *self.sealer.lock() = Some(handle);
        info!(coinbase = %self.mining_address(), "miner started");
    }

    /// Stops the sealing loop and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        if !self.mining.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let sealer = self.sealer.lock().take();
        if let Some(handle) = sealer {
            let _ = handle.await;
        }
        info!("miner stopped");
    }

    /// One sealing round: build, seal, land. Returns false when it is not
    /// this node's turn.
    pub fn seal_pending(&self) -> Result<bool> {
        let parent = self.chain.current_header();
        let next = parent.number + 1;
        if !self.engine.should_seal(next) {
            return Ok(false);
        }

        let gas_limit = parent
            .gas_limit
            .max(self.config.gas_floor)
            .min(self.config.gas_ceil);

        let mut transactions = Vec::new();
        let mut gas_used = 0u64;
        for tx in self.pool.pending() {
            if gas_used.saturating_add(tx.gas) > gas_limit {
                break;
            }
            gas_used += tx.gas;
            transactions.push(tx);
        }

        let tx_root = if transactions.is_empty() {
            H256::zero()
        } else {
            // Encoding plain transaction values cannot fail.
            H256::hash_of(&bincode::serialize(&transactions).unwrap_or_default())
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(parent.timestamp + 1);

        let header = Header {
            parent_hash: parent.hash(),
            number: next,
            timestamp: timestamp.max(parent.timestamp + 1),
            coinbase: self.mining_address(),
            state_root: H256::zero(),
            tx_root,
            gas_limit,
            gas_used,
            extra: Vec::new(),
        };
        let sealed = self.engine.seal(Block::new(header, transactions))?;
        let hash = sealed.hash();

        if let Err(e) = self.cache.execute_block(&sealed, &parent) {
            let _ = self.chain.snapshot().discard(&hash);
            return Err(e.into());
        }
        let outcome = match self.chain.insert_block(sealed.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.chain.snapshot().discard(&hash);
                return Err(e.into());
            }
        };
        if outcome != InsertOutcome::Extended {
            let _ = self.chain.snapshot().discard(&hash);
            warn!(number = next, ?outcome, "sealed block did not extend the head");
            return Ok(false);
        }
        self.chain.snapshot().commit(&hash)?;
        self.engine.confirm(&sealed);
        self.pool.prune_included(&sealed);

        debug!(
            number = next,
            %hash,
            txs = sealed.transactions.len(),
            "block sealed"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use tempfile::TempDir;

    use phoenix_config::{GenesisSpec, PbftOptions, TxPoolConfig};
    use phoenix_consensus::{Agency, ConsensusEngine, StaticAgency};
    use phoenix_core::{EventBus, NodeKey, Transaction, ValidatorNode};
    use phoenix_ledger::{setup_genesis_block, CacheConfig, ShouldPreserve};
    use phoenix_snapshotdb::SnapshotDb;
    use phoenix_storage::{Database, MemoryStore};

    use crate::executor::StateExecutor;

    async fn assemble(dir: &TempDir) -> (Arc<Miner>, Arc<BlockChain>, Arc<TxPool>) {
        let mut spec = GenesisSpec::default_private();
        if let Some(pbft) = spec.config.pbft.as_mut() {
            pbft.period = 1;
            pbft.amount = 10;
        }

        let db: Arc<dyn Database> = Arc::new(MemoryStore::new());
        setup_genesis_block(db.as_ref(), Some(&spec)).unwrap();
        let snapshot = Arc::new(SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap());

        let bus = Arc::new(EventBus::new());
        let key = NodeKey::generate();
        let addr: SocketAddr = "127.0.0.1:30310".parse().unwrap();
        let me = ValidatorNode::new(key.node_id(), addr);
        let options = PbftOptions {
            period: 1,
            amount: 10,
            initial_nodes: vec![me.clone()],
        };
        let pbft_config = spec.config.pbft.clone().unwrap();
        let engine = Arc::new(
            Pbft::new(pbft_config, &options, bus.clone(), key, dir.path()).unwrap(),
        );

        let preserve: ShouldPreserve = Arc::new(|_| false);
        let chain = BlockChain::new(
            db,
            snapshot.clone(),
            CacheConfig::default(),
            spec.config.clone(),
            engine.clone(),
            preserve,
            bus,
        )
        .unwrap();
        let genesis = chain.current_header();
        snapshot.new_block(0, genesis.hash()).unwrap();
        snapshot.commit(&genesis.hash()).unwrap();

        let cache = BlockChainCache::new(chain.clone());
        cache.set_executor(Arc::new(StateExecutor::new(snapshot)));
        let pool = TxPool::new(TxPoolConfig::default(), chain.clone(), None).unwrap();

        engine
            .start(
                chain.clone(),
                cache.clone(),
                pool.clone(),
                Agency::Static(StaticAgency::new(vec![me])),
            )
            .await
            .unwrap();

        let miner = Miner::new(
            chain.clone(),
            cache,
            pool.clone(),
            engine,
            MinerConfig {
                recommit: Duration::from_millis(20),
                ..MinerConfig::default()
            },
            Arc::new(RwLock::new(Address([9; 20]))),
        );
        (miner, chain, pool)
    }

    #[tokio::test]
    async fn seals_pending_transactions() {
        let dir = TempDir::new().unwrap();
        let (miner, chain, pool) = assemble(&dir).await;

        let tx = Transaction {
            from: Address([1; 20]),
            to: Some(Address([2; 20])),
            nonce: 0,
            gas: 21_000,
            gas_price: 2_000_000_000,
            value: 0,
            input: Vec::new(),
        };
        pool.add_local(tx).unwrap();

        assert!(miner.seal_pending().unwrap());
        let head = chain.current_header();
        assert_eq!(head.number, 1);
        assert_eq!(head.coinbase, Address([9; 20]));
        assert_eq!(chain.snapshot().current().unwrap().number, 1);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn sealing_loop_advances_head() {
        let dir = TempDir::new().unwrap();
        let (miner, chain, _pool) = assemble(&dir).await;

        miner.start();
        miner.start();
        assert!(miner.is_mining());
        tokio::time::sleep(Duration::from_millis(120)).await;
        miner.stop().await;
        assert!(!miner.is_mining());
        assert!(chain.current_header().number >= 1);
    }
}
