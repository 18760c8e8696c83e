//! Governance plugin: chain parameters and version coordination.
//!
//! Parameters live in the snapshot base under `gov-param:` keys and are
//! changed through the plugin, which runs the registered verifier before
//! accepting a value. Validators declare the binary version they run;
//! once two thirds agree the declared version becomes active.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use phoenix_core::{Header, NodeId, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::plugin::PosPlugin;
use crate::staking;

/// Upper bound for block gas limits, governance controlled.
pub const PARAM_MAX_BLOCK_GAS_LIMIT: &str = "maxBlockGasLimit";

/// Ceiling applied while governance has not set one.
pub const DEFAULT_GAS_CEILING: u64 = 100_800_000;

const PARAM_PREFIX: &[u8] = b"gov-param:";
const DECLARE_PREFIX: &[u8] = b"gov-declare:";
const ACTIVE_VERSION_KEY: &[u8] = b"gov-active-version";

/// Checks a proposed parameter value, returning a reason on rejection.
pub type ParamVerifier = fn(&[u8]) -> std::result::Result<(), String>;

fn param_key(name: &str) -> Vec<u8> {
    let mut key = PARAM_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn declare_key(id: &NodeId) -> Vec<u8> {
    let mut key = DECLARE_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn encode_u64(value: u64) -> Result<Vec<u8>> {
    bincode::serialize(&value).map_err(|e| PosError::Encoding(e.to_string()))
}

fn decode_u64(raw: &[u8]) -> Result<u64> {
    bincode::deserialize(raw).map_err(|e| PosError::Encoding(e.to_string()))
}

/// Committed value of a parameter.
pub fn read_param(snap: &SnapshotDb, name: &str) -> Result<Option<Vec<u8>>> {
    Ok(snap.get_base(&param_key(name))?)
}

/// The governance gas ceiling at the current head, or the default when
/// governance has not written one yet.
pub fn gas_ceiling(snap: &SnapshotDb) -> Result<u64> {
    match read_param(snap, PARAM_MAX_BLOCK_GAS_LIMIT)? {
        Some(raw) => decode_u64(&raw),
        None => Ok(DEFAULT_GAS_CEILING),
    }
}

/// Writes a numeric parameter straight into the snapshot base, bypassing
/// verification. Reserved for genesis provisioning and operator tooling;
/// live changes go through [`GovernancePlugin::submit_param`].
pub fn seed_param(snap: &SnapshotDb, name: &str, value: u64) -> Result<()> {
    snap.put_base(&param_key(name), &encode_u64(value)?)?;
    Ok(())
}

/// Writes default values for parameters not yet present, into the pending
/// layer of `hash`. Run once while committing the genesis block.
pub fn bootstrap_params(snap: &SnapshotDb, hash: &H256) -> Result<()> {
    if read_param(snap, PARAM_MAX_BLOCK_GAS_LIMIT)?.is_none() {
        snap.put(
            hash,
            &param_key(PARAM_MAX_BLOCK_GAS_LIMIT),
            &encode_u64(DEFAULT_GAS_CEILING)?,
        )?;
        debug!(ceiling = DEFAULT_GAS_CEILING, "governance defaults written");
    }
    Ok(())
}

/// Records a validator's declared binary version.
pub fn declare_version(snap: &SnapshotDb, hash: &H256, id: &NodeId, version: u32) -> Result<()> {
    let encoded =
        bincode::serialize(&version).map_err(|e| PosError::Encoding(e.to_string()))?;
    Ok(snap.put(hash, &declare_key(id), &encoded)?)
}

/// Committed declared versions.
pub fn declared_versions(snap: &SnapshotDb) -> Result<Vec<(NodeId, u32)>> {
    snap.scan_base(DECLARE_PREFIX)?
        .into_iter()
        .map(|(key, raw)| {
            let id = NodeId::from_slice(&key[DECLARE_PREFIX.len()..])
                .map_err(|e| PosError::Encoding(e.to_string()))?;
            let version: u32 =
                bincode::deserialize(&raw).map_err(|e| PosError::Encoding(e.to_string()))?;
            Ok((id, version))
        })
        .collect()
}

/// The active protocol version, 1 until governance moves it.
pub fn active_version(snap: &SnapshotDb) -> Result<u32> {
    match snap.get_base(ACTIVE_VERSION_KEY)? {
        Some(raw) => bincode::deserialize(&raw).map_err(|e| PosError::Encoding(e.to_string())),
        None => Ok(1),
    }
}

/// The collect-declare-version rule step: activates a declared version
/// once more than two thirds of the active validators run it.
pub fn collect_declared_versions(snap: &SnapshotDb, hash: &H256) -> Result<()> {
    let declares = declared_versions(snap)?;
    if declares.is_empty() {
        return Ok(());
    }
    let total = staking::validators(snap)?.map(|v| v.len()).unwrap_or(0);
    if total == 0 {
        return Ok(());
    }

    let mut support: HashMap<u32, usize> = HashMap::new();
    for (_, version) in &declares {
        *support.entry(*version).or_default() += 1;
    }

    let active = active_version(snap)?;
    let winner = support
        .into_iter()
        .filter(|(version, count)| *version > active && count * 3 > total * 2)
        .max_by_key(|(version, _)| *version);

    if let Some((version, count)) = winner {
        let encoded =
            bincode::serialize(&version).map_err(|e| PosError::Encoding(e.to_string()))?;
        snap.put(hash, ACTIVE_VERSION_KEY, &encoded)?;
        for (id, _) in declares {
            snap.delete(hash, &declare_key(&id))?;
        }
        info!(version, count, total, "protocol version activated");
    }
    Ok(())
}

/// Accepts values for the gas-ceiling parameter.
pub fn verify_gas_ceiling(value: &[u8]) -> std::result::Result<(), String> {
    let parsed = bincode::deserialize::<u64>(value).map_err(|e| e.to_string())?;
    if !(10_000_000..=1_000_000_000).contains(&parsed) {
        return Err(format!("gas ceiling {parsed} out of range"));
    }
    Ok(())
}

/// Parameter custody and verification.
pub struct GovernancePlugin {
    chain_id: u64,
    verifiers: RwLock<HashMap<String, ParamVerifier>>,
}

impl GovernancePlugin {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            verifiers: RwLock::new(HashMap::new()),
        }
    }

    /// Chain this plugin governs.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Installs the verifier consulted before a parameter changes.
    pub fn register_param_verifier(&self, name: &str, verifier: ParamVerifier) {
        self.verifiers.write().insert(name.to_string(), verifier);
    }

    /// Names of parameters with a registered verifier.
    pub fn verified_params(&self) -> Vec<String> {
        let mut names: Vec<String> = self.verifiers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Verifies and stages a parameter change in the layer of `hash`.
    pub fn submit_param(
        &self,
        snap: &SnapshotDb,
        hash: &H256,
        name: &str,
        value: &[u8],
    ) -> Result<()> {
        if let Some(verifier) = self.verifiers.read().get(name) {
            verifier(value)
                .map_err(|reason| PosError::ParamRejected(name.to_string(), reason))?;
        }
        snap.put(hash, &param_key(name), value)?;
        Ok(())
    }
}

impl PosPlugin for GovernancePlugin {
    fn name(&self) -> &'static str {
        "governance"
    }

    fn begin_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }

    fn end_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }
}
