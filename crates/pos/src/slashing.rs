//! Slashing plugin: punishes validators caught double-signing.
//!
//! Evidence arrives as raw JSON from the consensus layer and is queued
//! until the next block begins. The plugin never parses wire bytes
//! itself; it uses the decoder installed during consensus assembly.

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use phoenix_consensus::evidence::{Evidence, EvidenceDecoder};
use phoenix_core::{Header, NodeId, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::plugin::PosPlugin;
use crate::staking;

const RECORD_PREFIX: &[u8] = b"slashing-record:";

fn record_key(id: &NodeId, number: u64) -> Vec<u8> {
    let mut key = RECORD_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key.push(b':');
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Processes duplicate-sign evidence into stake penalties.
pub struct SlashingPlugin {
    decoder: RwLock<Option<EvidenceDecoder>>,
    queue: Mutex<Vec<String>>,
    penalty_divisor: u32,
}

impl SlashingPlugin {
    /// `penalty_divisor` is the factor an offender's stake is cut by.
    pub fn new(penalty_divisor: u32) -> Self {
        Self {
            decoder: RwLock::new(None),
            queue: Mutex::new(Vec::new()),
            penalty_divisor: penalty_divisor.max(1),
        }
    }

    /// Installs the evidence decoder.
    pub fn set_decoder(&self, decoder: EvidenceDecoder) {
        *self.decoder.write() = Some(decoder);
    }

    /// Queues a raw evidence report for the next block.
    pub fn report_raw(&self, raw: String) {
        self.queue.lock().push(raw);
    }

    /// Queued reports not yet processed.
    pub fn pending_reports(&self) -> usize {
        self.queue.lock().len()
    }

    fn decode(&self, raw: &str) -> Result<Vec<Evidence>> {
        let decoder = (*self.decoder.read()).ok_or(PosError::Plugin {
            plugin: "slashing",
            reason: "no evidence decoder installed".into(),
        })?;
        decoder(raw).map_err(|e| PosError::Evidence(e.to_string()))
    }
}

impl PosPlugin for SlashingPlugin {
    fn name(&self) -> &'static str {
        "slashing"
    }

    fn begin_block(&self, hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()> {
        let reports: Vec<String> = std::mem::take(&mut *self.queue.lock());
        for raw in reports {
            let evidences = match self.decode(&raw) {
                Ok(list) => list,
                Err(e) => {
                    // A malformed report must not stall block processing.
                    warn!(error = %e, "dropping undecodable evidence report");
                    continue;
                }
            };
            for ev in evidences {
                let remaining =
                    staking::reduce_stake(snap, hash, &ev.validator, self.penalty_divisor)?;
                snap.put(
                    hash,
                    &record_key(&ev.validator, ev.number),
                    &bincode::serialize(&ev).map_err(|e| PosError::Encoding(e.to_string()))?,
                )?;
                info!(
                    validator = %ev.validator,
                    number = ev.number,
                    kind = ?ev.kind,
                    ?remaining,
                    "validator slashed"
                );
            }
        }
        let _ = header;
        Ok(())
    }

    fn end_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }
}

/// Committed slashing records against an identity.
pub fn records_for(snap: &SnapshotDb, id: &NodeId) -> Result<Vec<Evidence>> {
    let mut prefix = RECORD_PREFIX.to_vec();
    prefix.extend_from_slice(id.as_bytes());
    snap.scan_base(&prefix)?
        .into_iter()
        .map(|(_, raw)| {
            bincode::deserialize(&raw).map_err(|e| PosError::Encoding(e.to_string()))
        })
        .collect()
}
