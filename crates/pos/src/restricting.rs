//! Restricting plugin: scheduled release of locked balances.
//!
//! A plan locks an amount until a release height. At each end-of-block
//! the plugin releases every matured tranche of the accounts touched by
//! maturity, moving the amount from locked to released.

use serde::{Deserialize, Serialize};
use tracing::debug;

use phoenix_core::{Address, Header, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::plugin::PosPlugin;

const PLAN_PREFIX: &[u8] = b"restricting-plan:";
const RELEASED_PREFIX: &[u8] = b"restricting-released:";

/// Locked tranches of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictingPlan {
    /// (release height, amount) pairs, kept sorted by height.
    pub tranches: Vec<(u64, u128)>,
}

fn plan_key(addr: &Address) -> Vec<u8> {
    let mut key = PLAN_PREFIX.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

fn released_key(addr: &Address) -> Vec<u8> {
    let mut key = RELEASED_PREFIX.to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| PosError::Encoding(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| PosError::Encoding(e.to_string()))
}

/// Adds a locked tranche for `addr` in the pending layer of `hash`.
pub fn add_tranche(
    snap: &SnapshotDb,
    hash: &H256,
    addr: &Address,
    release_at: u64,
    amount: u128,
) -> Result<()> {
    let key = plan_key(addr);
    let mut plan: RestrictingPlan = match snap.get(Some(hash), &key)? {
        Some(raw) => decode(&raw)?,
        None => RestrictingPlan::default(),
    };
    plan.tranches.push((release_at, amount));
    plan.tranches.sort_by_key(|(h, _)| *h);
    Ok(snap.put(hash, &key, &encode(&plan)?)?)
}

/// Committed total already released to `addr`.
pub fn released(snap: &SnapshotDb, addr: &Address) -> Result<u128> {
    match snap.get_base(&released_key(addr))? {
        Some(raw) => decode(&raw),
        None => Ok(0),
    }
}

/// Committed plan of `addr`, if any tranche is still locked.
pub fn plan_of(snap: &SnapshotDb, addr: &Address) -> Result<Option<RestrictingPlan>> {
    match snap.get_base(&plan_key(addr))? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

/// Releases matured tranches at end of block.
#[derive(Default)]
pub struct RestrictingPlugin;

impl RestrictingPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl PosPlugin for RestrictingPlugin {
    fn name(&self) -> &'static str {
        "restricting"
    }

    fn begin_block(&self, _hash: &H256, _header: &Header, _snap: &SnapshotDb) -> Result<()> {
        Ok(())
    }

    fn end_block(&self, hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()> {
        for (key, raw) in snap.scan_base(PLAN_PREFIX)? {
            let mut plan: RestrictingPlan = decode(&raw)?;
            let before = plan.tranches.len();
            let mut matured: u128 = 0;
            plan.tranches.retain(|(release_at, amount)| {
                if *release_at <= header.number {
                    matured += amount;
                    false
                } else {
                    true
                }
            });
            if before == plan.tranches.len() {
                continue;
            }

            let addr = Address::from_slice(&key[PLAN_PREFIX.len()..])
                .map_err(|e| PosError::Encoding(e.to_string()))?;
            let total = released(snap, &addr)? + matured;
            snap.put(hash, &released_key(&addr), &encode(&total)?)?;
            if plan.tranches.is_empty() {
                snap.delete(hash, &key)?;
            } else {
                snap.put(hash, &key, &encode(&plan)?)?;
            }
            debug!(%addr, matured, "restricting release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_storage::MemoryStore;
    use std::sync::Arc;

    fn snap() -> SnapshotDb {
        SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap()
    }

    fn header(number: u64) -> Header {
        Header {
            parent_hash: H256::zero(),
            number,
            timestamp: 0,
            coinbase: Address::ZERO,
            state_root: H256::zero(),
            tx_root: H256::zero(),
            gas_limit: 0,
            gas_used: 0,
            extra: Vec::new(),
        }
    }

    #[test]
    fn matured_tranches_release_in_order() {
        let snap = snap();
        let addr = Address([3; 20]);
        let genesis = H256([0xaa; 32]);
        snap.new_block(0, genesis).unwrap();
        add_tranche(&snap, &genesis, &addr, 5, 100).unwrap();
        add_tranche(&snap, &genesis, &addr, 10, 200).unwrap();
        snap.commit(&genesis).unwrap();

        let plugin = RestrictingPlugin::new();

        let h5 = H256([5; 32]);
        snap.new_block(1, h5).unwrap();
        plugin.end_block(&h5, &header(5), &snap).unwrap();
        snap.commit(&h5).unwrap();
        assert_eq!(released(&snap, &addr).unwrap(), 100);
        assert_eq!(plan_of(&snap, &addr).unwrap().unwrap().tranches.len(), 1);

        let h10 = H256([10; 32]);
        snap.new_block(2, h10).unwrap();
        plugin.end_block(&h10, &header(10), &snap).unwrap();
        snap.commit(&h10).unwrap();
        assert_eq!(released(&snap, &addr).unwrap(), 300);
        assert_eq!(plan_of(&snap, &addr).unwrap(), None);
    }

    #[test]
    fn immature_plans_untouched() {
        let snap = snap();
        let addr = Address([4; 20]);
        let genesis = H256([0xaa; 32]);
        snap.new_block(0, genesis).unwrap();
        add_tranche(&snap, &genesis, &addr, 100, 50).unwrap();
        snap.commit(&genesis).unwrap();

        let h = H256([1; 32]);
        snap.new_block(1, h).unwrap();
        RestrictingPlugin::new()
            .end_block(&h, &header(1), &snap)
            .unwrap();
        snap.commit(&h).unwrap();
        assert_eq!(released(&snap, &addr).unwrap(), 0);
        assert!(plan_of(&snap, &addr).unwrap().is_some());
    }
}
