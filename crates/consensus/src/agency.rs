//! Validator agencies.
//!
//! An agency answers two questions: which validators may seal at a given
//! height, and whether a given node identity is one of them. The three
//! variants correspond to the validator modes a chain can be configured
//! with.

use std::sync::{Arc, Weak};

use phoenix_core::{ChainReader, NodeId, ValidatorNode, ValidatorProvider};

/// Fixed validator set taken from the chain configuration.
#[derive(Clone, Debug)]
pub struct StaticAgency {
    nodes: Vec<ValidatorNode>,
}

impl StaticAgency {
    pub fn new(nodes: Vec<ValidatorNode>) -> Self {
        Self { nodes }
    }

    fn validators(&self) -> Vec<ValidatorNode> {
        self.nodes.clone()
    }
}

/// Rotating schedule over the initial validators.
///
/// Each validator seals `blocks_per_node` consecutive blocks; the returned
/// set is the initial list rotated so the scheduled sealer comes first.
/// The offset shifts the schedule so a rotation is announced two turns
/// ahead of the height it applies to.
pub struct InnerAgency {
    nodes: Vec<ValidatorNode>,
    blocks_per_node: u64,
    offset: u64,
    chain: Weak<dyn ChainReader>,
}

impl InnerAgency {
    pub fn new(nodes: Vec<ValidatorNode>, blocks_per_node: u64, chain: Weak<dyn ChainReader>) -> Self {
        let blocks_per_node = blocks_per_node.max(1);
        Self {
            nodes,
            blocks_per_node,
            offset: 2 * blocks_per_node,
            chain,
        }
    }

    pub fn blocks_per_node(&self) -> u64 {
        self.blocks_per_node
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn validators(&self, number: u64) -> Vec<ValidatorNode> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let n = self.nodes.len() as u64;
        let turn = (number + self.offset) / self.blocks_per_node % n;
        let mut out = Vec::with_capacity(self.nodes.len());
        for i in 0..self.nodes.len() {
            out.push(self.nodes[(turn as usize + i) % self.nodes.len()].clone());
        }
        out
    }

    /// Height of the chain head this agency observes, zero when the chain
    /// is already gone.
    pub fn head_number(&self) -> u64 {
        self.chain
            .upgrade()
            .map(|c| c.current_header().number)
            .unwrap_or(0)
    }
}

/// The validator-selection capability handed to the engine at start.
pub enum Agency {
    /// Fixed list from the genesis configuration.
    Static(StaticAgency),
    /// Rotating schedule over the initial validators.
    Inner(InnerAgency),
    /// Delegated proof of stake, backed by the staking state.
    Dpos(Arc<dyn ValidatorProvider>),
}

impl Agency {
    /// Ordered validator set for the given height.
    pub fn validators_at(&self, number: u64) -> Vec<ValidatorNode> {
        match self {
            Agency::Static(a) => a.validators(),
            Agency::Inner(a) => a.validators(number),
            Agency::Dpos(p) => p.validators_at(number).unwrap_or_default(),
        }
    }

    /// True when `id` is in the set active at `number`.
    pub fn is_validator(&self, number: u64, id: &NodeId) -> bool {
        match self {
            Agency::Dpos(p) => p.is_validator(number, id),
            _ => self.validators_at(number).iter().any(|v| &v.id == id),
        }
    }

    /// Mode tag for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Agency::Static(_) => "static",
            Agency::Inner(_) => "inner",
            Agency::Dpos(_) => "dpos",
        }
    }
}
