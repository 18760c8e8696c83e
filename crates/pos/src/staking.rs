//! Staking plugin: candidate pool and validator elections.
//!
//! Candidates stake to enter the pool; every epoch boundary the plugin
//! elects the top-staked candidates into the active set, breaking ties
//! with the seeded VRF score. The active set is what the delegated-PoS
//! agency serves to the consensus engine.

use serde::{Deserialize, Serialize};
use tracing::debug;

use phoenix_core::{Header, NodeId, ValidatorNode, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::plugin::PosPlugin;
use crate::vrf::VrfHandler;

/// Base key holding the committed active validator set.
pub const VALIDATORS_KEY: &[u8] = b"staking-validators";

const CANDIDATE_PREFIX: &[u8] = b"staking-candidate:";

/// One entry of the candidate pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub node: ValidatorNode,
    pub stake: u128,
}

fn candidate_key(id: &NodeId) -> Vec<u8> {
    let mut key = CANDIDATE_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| PosError::Encoding(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| PosError::Encoding(e.to_string()))
}

/// Seeds the candidate pool and active set from the initial validators.
/// Writes into the pending layer of `hash`; the caller commits it.
pub fn bootstrap(
    snap: &SnapshotDb,
    hash: &H256,
    nodes: &[ValidatorNode],
    initial_stake: u128,
) -> Result<()> {
    for node in nodes {
        let candidate = Candidate {
            node: node.clone(),
            stake: initial_stake,
        };
        snap.put(hash, &candidate_key(&node.id), &encode(&candidate)?)?;
    }
    snap.put(hash, VALIDATORS_KEY, &encode(&nodes.to_vec())?)?;
    Ok(())
}

/// Adds or replaces a candidate in the pending layer of `hash`.
pub fn add_candidate(snap: &SnapshotDb, hash: &H256, candidate: &Candidate) -> Result<()> {
    Ok(snap.put(hash, &candidate_key(&candidate.node.id), &encode(candidate)?)?)
}

/// Committed candidate pool.
pub fn candidates(snap: &SnapshotDb) -> Result<Vec<Candidate>> {
    snap.scan_base(CANDIDATE_PREFIX)?
        .into_iter()
        .map(|(_, raw)| decode(&raw))
        .collect()
}

/// Committed active validator set, if one has been elected.
pub fn validators(snap: &SnapshotDb) -> Result<Option<Vec<ValidatorNode>>> {
    match snap.get_base(VALIDATORS_KEY)? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

/// Divides a candidate's stake, recording the cut in the pending layer.
/// Returns the remaining stake; unknown identities are ignored.
pub fn reduce_stake(
    snap: &SnapshotDb,
    hash: &H256,
    id: &NodeId,
    divisor: u32,
) -> Result<Option<u128>> {
    let key = candidate_key(id);
    let Some(raw) = snap.get(Some(hash), &key)? else {
        return Ok(None);
    };
    let mut candidate: Candidate = decode(&raw)?;
    candidate.stake /= divisor.max(1) as u128;
    snap.put(hash, &key, &encode(&candidate)?)?;
    Ok(Some(candidate.stake))
}

/// Elects validators every epoch boundary.
pub struct StakingPlugin {
    max_validators: usize,
    epoch_blocks: u64,
    vrf: VrfHandler,
}

impl StakingPlugin {
    pub fn new(max_validators: usize, epoch_blocks: u64, vrf: VrfHandler) -> Self {
        Self {
            max_validators: max_validators.max(1),
            epoch_blocks: epoch_blocks.max(1),
            vrf,
        }
    }

    fn elect(&self, number: u64, mut pool: Vec<Candidate>) -> Vec<ValidatorNode> {
        pool.sort_by(|a, b| {
            b.stake.cmp(&a.stake).then_with(|| {
                self.vrf
                    .score(number, &b.node.id)
                    .cmp(&self.vrf.score(number, &a.node.id))
            })
        });
        pool.into_iter()
            .take(self.max_validators)
            .map(|c| c.node)
            .collect()
    }
}

impl PosPlugin for StakingPlugin {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn begin_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }

    fn end_block(&self, hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()> {
        if header.number == 0 || header.number % self.epoch_blocks != 0 {
            return Ok(());
        }
        let pool = candidates(snap)?;
        if pool.is_empty() {
            return Ok(());
        }
        let elected = self.elect(header.number, pool);
        debug!(
            number = header.number,
            elected = elected.len(),
            "validator election"
        );
        Ok(snap.put(hash, VALIDATORS_KEY, &encode(&elected)?)?)
    }
}
