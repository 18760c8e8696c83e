//! Engine contracts the node assembles against.

use std::sync::Arc;

use async_trait::async_trait;

use phoenix_core::{Address, ApiDescriptor, ChainCache, ChainReader, Header, TxPoolApi};

use crate::agency::Agency;
use crate::error::Result;

/// A sub-protocol the engine speaks on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolSpec {
    pub name: &'static str,
    pub version: u32,
}

/// The contract every consensus engine offers the node.
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Address credited with sealing the header.
    fn author(&self, header: &Header) -> Result<Address>;

    /// Verifies a header's seal against the active validator set.
    fn verify_header(&self, header: &Header) -> Result<()>;

    /// Hands the engine its chain view, transaction source, and agency,
    /// and brings it online.
    async fn start(
        &self,
        chain: Arc<dyn ChainReader>,
        cache: Arc<dyn ChainCache>,
        pool: Arc<dyn TxPoolApi>,
        agency: Agency,
    ) -> Result<()>;

    /// Shuts the engine down and releases its journal.
    async fn close(&self) -> Result<()>;

    /// Wire protocols the protocol manager must register for the engine.
    fn protocols(&self) -> Vec<ProtocolSpec>;

    /// RPC namespaces the engine contributes.
    fn apis(&self) -> Vec<ApiDescriptor>;
}

/// Refinement for PBFT engines: consensus membership is knowable.
pub trait PbftEngine: ConsensusEngine {
    /// True when this node is in the validator set that seals next.
    fn is_consensus_node(&self) -> bool;
}
