//! Reward plugin: credits the block's sealer.

use phoenix_core::{Address, Header, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::plugin::PosPlugin;

const BALANCE_PREFIX: &[u8] = b"reward-balance:";

fn balance_key(addr: &Address) -> Vec<u8> {
    let mut key = BALANCE_PREFIX.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

fn decode(raw: &[u8]) -> Result<u128> {
    bincode::deserialize(raw).map_err(|e| PosError::Encoding(e.to_string()))
}

/// Committed reward balance of an address.
pub fn balance_of(snap: &SnapshotDb, addr: &Address) -> Result<u128> {
    match snap.get_base(&balance_key(addr))? {
        Some(raw) => decode(&raw),
        None => Ok(0),
    }
}

/// Pays a fixed amount per sealed block.
pub struct RewardPlugin {
    per_block: u128,
}

impl RewardPlugin {
    pub fn new(per_block: u128) -> Self {
        Self { per_block }
    }
}

impl PosPlugin for RewardPlugin {
    fn name(&self) -> &'static str {
        "reward"
    }

    fn begin_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }

    fn end_block(&self, hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()> {
        if header.coinbase.is_zero() || self.per_block == 0 {
            return Ok(());
        }
        let key = balance_key(&header.coinbase);
        let current = match snap.get(Some(hash), &key)? {
            Some(raw) => decode(&raw)?,
            None => 0,
        };
        let updated = current.saturating_add(self.per_block);
        let encoded =
            bincode::serialize(&updated).map_err(|e| PosError::Encoding(e.to_string()))?;
        Ok(snap.put(hash, &key, &encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_storage::MemoryStore;
    use std::sync::Arc;

    fn header(number: u64, coinbase: Address) -> Header {
        Header {
            parent_hash: H256::zero(),
            number,
            timestamp: 0,
            coinbase,
            state_root: H256::zero(),
            tx_root: H256::zero(),
            gas_limit: 0,
            gas_used: 0,
            extra: Vec::new(),
        }
    }

    #[test]
    fn rewards_accumulate() {
        let snap = SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap();
        let sealer = Address([8; 20]);
        let plugin = RewardPlugin::new(50);

        for number in 1..=3u64 {
            let hash = H256([number as u8; 32]);
            snap.new_block(number, hash).unwrap();
            plugin
                .end_block(&hash, &header(number, sealer), &snap)
                .unwrap();
            snap.commit(&hash).unwrap();
        }
        assert_eq!(balance_of(&snap, &sealer).unwrap(), 150);
    }

    #[test]
    fn zero_coinbase_earns_nothing() {
        let snap = SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap();
        let plugin = RewardPlugin::new(50);
        let hash = H256([1; 32]);
        snap.new_block(1, hash).unwrap();
        plugin
            .end_block(&hash, &header(1, Address::ZERO), &snap)
            .unwrap();
        snap.commit(&hash).unwrap();
        assert_eq!(balance_of(&snap, &Address::ZERO).unwrap(), 0);
    }
}
