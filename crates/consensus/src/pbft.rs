//! The PBFT engine.
//!
//! Header seals are 65-byte recoverable signatures appended to the extra
//! field. The engine decides sealing turns from the agency it is started
//! with; the round-robin quota is the configured `amount`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use phoenix_config::{PbftChainConfig, PbftOptions};
use phoenix_core::{
    recover_node_id, Address, ApiDescriptor, Block, ChainCache, ChainReader, EventBus, Header,
    NodeEvent, NodeId, NodeKey, TxPoolApi, H256,
};

use crate::agency::Agency;
use crate::engine::{ConsensusEngine, PbftEngine, ProtocolSpec};
use crate::error::{ConsensusError, Result};
use crate::wal::Wal;

/// Length of the recoverable seal signature in the extra field.
pub const SEAL_LENGTH: usize = 65;

#[derive(Serialize, Deserialize)]
struct SealRecord {
    number: u64,
    hash: H256,
}

struct Started {
    chain: Arc<dyn ChainReader>,
    #[allow(dead_code)]
    cache: Arc<dyn ChainCache>,
    pool: Arc<dyn TxPoolApi>,
    agency: Agency,
}

/// PBFT consensus engine.
pub struct Pbft {
    config: PbftChainConfig,
    node_key: NodeKey,
    bus: Arc<EventBus>,
    wal: Wal,
    started: RwLock<Option<Started>>,
}

impl Pbft {
    /// Builds the engine from the reconciled chain configuration and the
    /// operator's options. Fails when the configuration cannot drive a
    /// schedule, which the caller treats as fatal.
    pub fn new(
        mut config: PbftChainConfig,
        options: &PbftOptions,
        bus: Arc<EventBus>,
        node_key: NodeKey,
        wal_dir: &Path,
    ) -> Result<Self> {
        if config.period == 0 {
            return Err(ConsensusError::Config("period must be positive".into()));
        }
        if config.amount == 0 {
            return Err(ConsensusError::Config("amount must be positive".into()));
        }
        if config.initial_nodes.is_empty() {
            config.initial_nodes = options.initial_nodes.clone();
        }
        let wal = Wal::open(wal_dir)?;
        Ok(Self {
            config,
            node_key,
            bus,
            wal,
            started: RwLock::new(None),
        })
    }

    /// The engine's own identity.
    pub fn node_id(&self) -> NodeId {
        self.node_key.node_id()
    }

    /// Reconciled PBFT configuration the engine runs with.
    pub fn config(&self) -> &PbftChainConfig {
        &self.config
    }

    /// Validators the engine dials when it participates in consensus.
    pub fn initial_nodes(&self) -> &[phoenix_core::ValidatorNode] {
        &self.config.initial_nodes
    }

    /// Digest a seal signs: the header with the signature stripped.
    fn seal_hash(header: &Header, sealed: bool) -> H256 {
        if !sealed {
            return header.hash();
        }
        let mut unsealed = header.clone();
        let keep = unsealed.extra.len().saturating_sub(SEAL_LENGTH);
        unsealed.extra.truncate(keep);
        unsealed.hash()
    }

    fn signer_of(header: &Header) -> Result<NodeId> {
        if header.extra.len() < SEAL_LENGTH {
            return Err(ConsensusError::InvalidHeader {
                number: header.number,
                reason: "extra shorter than seal".into(),
            });
        }
        let mut sig = [0u8; SEAL_LENGTH];
        sig.copy_from_slice(&header.extra[header.extra.len() - SEAL_LENGTH..]);
        let digest = Self::seal_hash(header, true);
        Ok(recover_node_id(&digest, &sig)?)
    }

    fn scheduled_sealer(&self, agency: &Agency, number: u64) -> Option<NodeId> {
        let set = agency.validators_at(number);
        if set.is_empty() {
            return None;
        }
        let slot = match agency {
            // The inner rotation already puts the scheduled sealer first.
            Agency::Inner(_) => 0,
            _ => (number / self.config.amount as u64) as usize % set.len(),
        };
        Some(set[slot].id)
    }

    /// Whether this node seals the given height.
    pub fn should_seal(&self, number: u64) -> bool {
        let guard = self.started.read();
        let Some(started) = guard.as_ref() else {
            return false;
        };
        self.scheduled_sealer(&started.agency, number) == Some(self.node_id())
    }

    /// Signs the block's header, journaling the seal first.
    pub fn seal(&self, block: Block) -> Result<Block> {
        let number = block.number();
        if !self.should_seal(number) {
            return Err(ConsensusError::NotOurTurn(number));
        }
        let mut header = block.header.clone();
        let digest = Self::seal_hash(&header, false);

        let record = SealRecord {
            number,
            hash: digest,
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| ConsensusError::Wal(e.to_string()))?;
        self.wal.append(&encoded)?;

        let sig = self.node_key.sign(&digest)?;
        header.extra.extend_from_slice(&sig);
        Ok(Block::new(header, block.transactions))
    }

    /// Announces finality of an inserted block on the bus.
    pub fn confirm(&self, block: &Block) {
        let _ = self.bus.post(NodeEvent::BlockConfirmed(block.clone()));
    }

    /// Pending transactions as the sealer sees them.
    pub fn pending_transactions(&self) -> Vec<phoenix_core::Transaction> {
        self.started
            .read()
            .as_ref()
            .map(|s| s.pool.pending())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConsensusEngine for Pbft {
    fn author(&self, header: &Header) -> Result<Address> {
        let signer = Self::signer_of(header)?;
        Ok(Address::from_node_id(&signer))
    }

    fn verify_header(&self, header: &Header) -> Result<()> {
        let signer = Self::signer_of(header)?;
        let guard = self.started.read();
        let started = guard.as_ref().ok_or(ConsensusError::NotStarted)?;
        if !started.agency.is_validator(header.number, &signer) {
            return Err(ConsensusError::InvalidHeader {
                number: header.number,
                reason: "sealer not in validator set".into(),
            });
        }
        Ok(())
    }

    async fn start(
        &self,
        chain: Arc<dyn ChainReader>,
        cache: Arc<dyn ChainCache>,
        pool: Arc<dyn TxPoolApi>,
        agency: Agency,
    ) -> Result<()> {
        let mut guard = self.started.write();
        if guard.is_some() {
            return Err(ConsensusError::AlreadyStarted);
        }
        let journaled = self.wal.replay()?.len();
        info!(
            mode = agency.mode(),
            period = self.config.period,
            amount = self.config.amount,
            journaled,
            "pbft engine started"
        );
        *guard = Some(Started {
            chain,
            cache,
            pool,
            agency,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let was_started = self.started.write().take().is_some();
        self.wal.close()?;
        if was_started {
            debug!("pbft engine closed");
        }
        Ok(())
    }

    fn protocols(&self) -> Vec<ProtocolSpec> {
        vec![ProtocolSpec {
            name: "pbft",
            version: 1,
        }]
    }

    fn apis(&self) -> Vec<ApiDescriptor> {
        vec![ApiDescriptor::new("debug", "consensus", true)]
    }
}

impl PbftEngine for Pbft {
    fn is_consensus_node(&self) -> bool {
        let guard = self.started.read();
        let Some(started) = guard.as_ref() else {
            return false;
        };
        let next = started.chain.current_header().number + 1;
        started.agency.is_validator(next, &self.node_id())
    }
}
