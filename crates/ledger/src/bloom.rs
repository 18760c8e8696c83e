//! Section-aggregated address filters.
//!
//! Each block contributes the addresses it touched (coinbase plus every
//! transaction endpoint) to a per-section bloom filter; completed sections
//! are persisted so "which sections saw activity for this address" can be
//! answered without walking headers. Queries are served by a small crew of
//! worker tasks fed over a channel, so a burst of filter requests never
//! runs on the caller's task.

use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use phoenix_core::{Address, Block, EventBus, NodeEvent};
use phoenix_storage::Database;

use crate::error::Result;

/// Blocks folded into one section filter.
pub const BLOOM_SECTION_SIZE: u64 = 4096;

/// Bits per section filter.
const BLOOM_BITS: usize = 2048;

/// Worker tasks answering filter queries.
pub const BLOOM_WORKERS: usize = 3;

const SECTION_KEY_PREFIX: &[u8] = b"bloom-section:";

fn section_key(section: u64) -> Vec<u8> {
    let mut key = SECTION_KEY_PREFIX.to_vec();
    key.extend_from_slice(&section.to_be_bytes());
    key
}

/// Three probe positions derived from the address, geth-style.
fn bloom_positions(address: &Address) -> [usize; 3] {
    let digest = Sha256::digest(address.as_bytes());
    let mut out = [0usize; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        let hi = digest[2 * i] as usize;
        let lo = digest[2 * i + 1] as usize;
        *slot = (hi << 8 | lo) % BLOOM_BITS;
    }
    out
}

/// One section's filter bits.
#[derive(Clone)]
pub struct SectionBloom {
    bits: [u8; BLOOM_BITS / 8],
}

impl SectionBloom {
    fn empty() -> Self {
        Self {
            bits: [0u8; BLOOM_BITS / 8],
        }
    }

    fn from_bytes(raw: &[u8]) -> Self {
        let mut bits = [0u8; BLOOM_BITS / 8];
        let take = raw.len().min(bits.len());
        bits[..take].copy_from_slice(&raw[..take]);
        Self { bits }
    }

    fn add(&mut self, address: &Address) {
        for pos in bloom_positions(address) {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    fn union(&mut self, other: &SectionBloom) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        bloom_positions(address)
            .iter()
            .all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }
}

/// A filter query answered by the worker crew.
struct BloomRequest {
    address: Address,
    section: u64,
    reply: oneshot::Sender<bool>,
}

/// Handle for submitting filter queries.
#[derive(Clone)]
pub struct BloomRequester {
    tx: mpsc::Sender<BloomRequest>,
}

impl BloomRequester {
    /// Whether the section's filter may contain the address. `None` once
    /// the workers have shut down.
    pub async fn contains(&self, address: Address, section: u64) -> Option<bool> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(BloomRequest {
                address,
                section,
                reply,
            })
            .await
            .ok()?;
        answer.await.ok()
    }
}

struct SectionState {
    section: u64,
    acc: SectionBloom,
}

/// Maintains the per-section filters and serves queries against them.
pub struct BloomIndexer {
    db: Arc<dyn Database>,
    section_size: u64,
    state: Mutex<SectionState>,
    request_tx: Mutex<Option<mpsc::Sender<BloomRequest>>>,
    request_rx: Mutex<Option<mpsc::Receiver<BloomRequest>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl BloomIndexer {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Self::with_section_size(db, BLOOM_SECTION_SIZE)
    }

    /// Section size is parameterized for tests; production uses
    /// [`BLOOM_SECTION_SIZE`].
    pub fn with_section_size(db: Arc<dyn Database>, section_size: u64) -> Arc<Self> {
        let (request_tx, request_rx) = mpsc::channel(64);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            db,
            section_size: section_size.max(1),
            state: Mutex::new(SectionState {
                section: 0,
                acc: SectionBloom::empty(),
            }),
            request_tx: Mutex::new(Some(request_tx)),
            request_rx: Mutex::new(Some(request_rx)),
            watcher: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    pub fn section_of(&self, number: u64) -> u64 {
        number / self.section_size
    }

    /// Folds one block's touched addresses into its section filter,
    /// persisting the previous section when the block crosses a boundary.
    pub fn index_block(&self, block: &Block) -> Result<()> {
        let section = self.section_of(block.number());
        let mut state = self.state.lock();
        if section != state.section {
            let done = std::mem::replace(&mut state.acc, SectionBloom::empty());
            let old = state.section;
            state.section = section;
            drop(state);
            self.persist(old, &done)?;
            state = self.state.lock();
        }
        state.acc.add(&block.header.coinbase);
        for tx in &block.transactions {
            state.acc.add(&tx.from);
            if let Some(to) = &tx.to {
                state.acc.add(to);
            }
        }
        Ok(())
    }

    /// Unions the accumulated bits into the stored section filter.
    fn persist(&self, section: u64, bloom: &SectionBloom) -> Result<()> {
        if bloom.is_empty() {
            return Ok(());
        }
        let key = section_key(section);
        let mut merged = match self.db.get(&key)? {
            Some(raw) => SectionBloom::from_bytes(&raw),
            None => SectionBloom::empty(),
        };
        merged.union(bloom);
        self.db.put(&key, &merged.bits)?;
        debug!(section, "bloom section persisted");
        Ok(())
    }

    /// Whether the section's filter may contain the address, consulting
    /// the in-memory head section before the stored ones.
    pub fn probe(&self, address: &Address, section: u64) -> Result<bool> {
        {
            let state = self.state.lock();
            if state.section == section && state.acc.contains(address) {
                return Ok(true);
            }
        }
        match self.db.get(&section_key(section))? {
            Some(raw) => Ok(SectionBloom::from_bytes(&raw).contains(address)),
            None => Ok(false),
        }
    }

    /// Handle for submitting queries to the worker crew.
    pub fn requester(&self) -> Option<BloomRequester> {
        self.request_tx
            .lock()
            .as_ref()
            .map(|tx| BloomRequester { tx: tx.clone() })
    }

    /// Starts the query workers and the head watcher. The watcher folds
    /// every new canonical block into the filters.
    pub fn start(self: &Arc<Self>, bus: &EventBus, workers: usize) {
        {
            let mut guard = self.watcher.lock();
            if guard.is_none() {
                let indexer = self.clone();
                let mut events = bus.subscribe();
                let mut shutdown = self.shutdown.subscribe();
                *guard = Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            event = events.recv() => match event {
                                Ok(NodeEvent::NewChainHead(block)) => {
                                    if let Err(e) = indexer.index_block(&block) {
                                        warn!(number = block.number(), error = %e, "bloom indexing failed");
                                    }
                                }
                                Ok(_) => {}
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                }));
            }
        }

        let receiver = self.request_rx.lock().take();
        if let Some(receiver) = receiver {
            let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
            let mut handles = self.workers.lock();
            for _ in 0..workers.max(1) {
                let indexer = self.clone();
                let receiver = receiver.clone();
                handles.push(tokio::spawn(async move {
                    loop {
                        let request = { receiver.lock().await.recv().await };
                        let Some(request) = request else { break };
                        let hit = indexer
                            .probe(&request.address, request.section)
                            .unwrap_or(false);
                        let _ = request.reply.send(hit);
                    }
                }));
            }
        }
    }

    /// Stops indexing and persists the partial head section.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let (section, acc) = {
            let mut state = self.state.lock();
            let acc = std::mem::replace(&mut state.acc, SectionBloom::empty());
            (state.section, acc)
        };
        self.persist(section, &acc)?;
        debug!("bloom indexer closed");
        Ok(())
    }

    /// Closes the request channel and waits for the workers to drain.
    pub async fn close_handlers(&self) {
        drop(self.request_tx.lock().take());
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("bloom handlers closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::{Header, Transaction, H256};
    use phoenix_storage::MemoryStore;

    fn block(number: u64, coinbase: u8, touched: &[u8]) -> Block {
        Block::new(
            Header {
                parent_hash: H256::zero(),
                number,
                timestamp: 0,
                coinbase: Address([coinbase; 20]),
                state_root: H256::zero(),
                tx_root: H256::zero(),
                gas_limit: 0,
                gas_used: 0,
                extra: Vec::new(),
            },
            touched
                .iter()
                .map(|b| Transaction {
                    from: Address([*b; 20]),
                    to: None,
                    nonce: 0,
                    gas: 21_000,
                    gas_price: 1,
                    value: 0,
                    input: Vec::new(),
                })
                .collect(),
        )
    }

    #[test]
    fn sections_fill_and_persist_on_boundary() {
        let indexer = BloomIndexer::with_section_size(Arc::new(MemoryStore::new()), 4);
        for n in 0..4 {
            indexer.index_block(&block(n, 1, &[])).unwrap();
        }
        // Head section still in memory.
        assert!(indexer.probe(&Address([1; 20]), 0).unwrap());

        // Crossing into section 1 persists section 0.
        indexer.index_block(&block(4, 2, &[])).unwrap();
        assert!(indexer.probe(&Address([1; 20]), 0).unwrap());
        assert!(indexer.probe(&Address([2; 20]), 1).unwrap());
        assert!(!indexer.probe(&Address([9; 20]), 0).unwrap());
    }

    #[test]
    fn transaction_endpoints_are_indexed() {
        let indexer = BloomIndexer::with_section_size(Arc::new(MemoryStore::new()), 4);
        indexer.index_block(&block(0, 1, &[7, 8])).unwrap();
        assert!(indexer.probe(&Address([7; 20]), 0).unwrap());
        assert!(indexer.probe(&Address([8; 20]), 0).unwrap());
        assert!(!indexer.probe(&Address([7; 20]), 3).unwrap());
    }

    #[tokio::test]
    async fn close_persists_partial_section() {
        let db: Arc<dyn Database> = Arc::new(MemoryStore::new());
        let indexer = BloomIndexer::with_section_size(db.clone(), 100);
        indexer.index_block(&block(1, 5, &[])).unwrap();
        indexer.close().await.unwrap();

        let reopened = BloomIndexer::with_section_size(db, 100);
        assert!(reopened.probe(&Address([5; 20]), 0).unwrap());
    }

    #[tokio::test]
    async fn workers_answer_and_drain_on_close() {
        let indexer = BloomIndexer::with_section_size(Arc::new(MemoryStore::new()), 4);
        let bus = EventBus::new();
        indexer.index_block(&block(0, 3, &[])).unwrap();
        indexer.start(&bus, 2);

        let requester = indexer.requester().unwrap();
        assert_eq!(requester.contains(Address([3; 20]), 0).await, Some(true));
        assert_eq!(requester.contains(Address([4; 20]), 0).await, Some(false));

        indexer.close().await.unwrap();
        indexer.close_handlers().await;
        assert_eq!(requester.contains(Address([3; 20]), 0).await, None);
    }

    #[tokio::test]
    async fn watcher_indexes_new_heads() {
        let indexer = BloomIndexer::with_section_size(Arc::new(MemoryStore::new()), 4);
        let bus = Arc::new(EventBus::new());
        indexer.start(&bus, 1);

        bus.post(NodeEvent::NewChainHead(block(0, 6, &[]))).unwrap();
        // The watcher runs on its own task; poll until it catches up.
        for _ in 0..50 {
            if indexer.probe(&Address([6; 20]), 0).unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(indexer.probe(&Address([6; 20]), 0).unwrap());
        indexer.close().await.unwrap();
        indexer.close_handlers().await;
    }
}
