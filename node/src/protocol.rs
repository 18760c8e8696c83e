//! Protocol manager: the sync and gossip front of the node.
//!
//! Peers hand blocks to [`ProtocolManager::import_block`]; the manager
//! executes them through the cache, inserts them into the chain, and
//! settles the snapshot layer the execution opened. Remote transactions
//! stay rejected until the first head event, the in-process stand-in for
//! initial sync completing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use phoenix_consensus::ProtocolSpec;
use phoenix_core::{Block, ChainCache, EventBus, NodeEvent, TxPoolApi};
use phoenix_ledger::{BlockChain, BlockChainCache, InsertOutcome, LedgerError, TxPool};

use crate::error::Result;

/// The base block-exchange protocol.
const PROTOCOL_NAME: &str = "phx";
const PROTOCOL_VERSION: u32 = 1;

pub struct ProtocolManager {
    network_id: u64,
    chain: Arc<BlockChain>,
    cache: Arc<BlockChainCache>,
    pool: Arc<TxPool>,
    engine_protocols: Vec<ProtocolSpec>,
    max_peers: AtomicUsize,
    running: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ProtocolManager {
    pub fn new(
        network_id: u64,
        chain: Arc<BlockChain>,
        cache: Arc<BlockChainCache>,
        pool: Arc<TxPool>,
        engine_protocols: Vec<ProtocolSpec>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            network_id,
            chain,
            cache,
            pool,
            engine_protocols,
            max_peers: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            watcher: Mutex::new(None),
            shutdown,
        })
    }

    /// Protocols this manager answers on, engine protocols included.
    pub fn protocols(&self) -> Vec<ProtocolSpec> {
        let mut protocols = vec![ProtocolSpec {
            name: PROTOCOL_NAME,
            version: PROTOCOL_VERSION,
        }];
        protocols.extend(self.engine_protocols.iter().cloned());
        protocols
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts the head watcher with the given peer allowance.
    pub fn start(self: &Arc<Self>, bus: &Arc<EventBus>, max_peers: usize) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.max_peers.store(max_peers, Ordering::Release);

        let manager = Arc::clone(self);
        let mut events = bus.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = events.recv() => match event {
                        Ok(NodeEvent::NewChainHead(block)) => {
                            // The first head means the chain is serviceable;
                            // open the pool to remote transactions.
                            if !manager.pool.accepts_remotes() {
                                manager.pool.set_accept_remotes(true);
                            }
                            debug!(number = block.number(), "head broadcast to peers");
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "head watcher lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        *self.watcher.lock() = Some(handle);
        info!(max_peers, network_id = self.network_id, "protocol manager started");
    }

    /// Imports a block received from a peer. The snapshot layer opened by
    /// execution is committed only when the block extends the head;
    /// displaced and side-chain layers are discarded.
    pub fn import_block(&self, block: Block) -> Result<InsertOutcome> {
        let parent_hash = block.parent_hash();
        let parent = self
            .chain
            .get_header_by_hash(&parent_hash)
            .ok_or(LedgerError::UnknownAncestor {
                number: block.number(),
                parent: parent_hash,
            })?;

        self.cache.execute_block(&block, &parent)?;

        let hash = block.hash();
        let number = block.number();
        let outcome = self.chain.insert_block(block)?;
        match outcome {
            InsertOutcome::Extended => {
                self.chain.snapshot().commit(&hash)?;
            }
            InsertOutcome::Reorged => {
                // Snapshot layers commit in height order only; a reorg
                // leaves the snapshot behind until the next restart's
                // catch-up replays onto the new canonical chain.
                self.chain.snapshot().discard(&hash)?;
                warn!(number, %hash, "reorg imported, snapshot deferred to catch-up");
            }
            InsertOutcome::SideChain | InsertOutcome::AlreadyKnown => {
                self.chain.snapshot().discard(&hash)?;
                debug!(number, %hash, "non-canonical block stored");
            }
        }
        Ok(outcome)
    }

    /// Stops the watcher. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            let _ = handle.await;
        }
        info!("protocol manager stopped");
    }
}
