//! Genesis construction and reconciliation.
//!
//! `setup_genesis_block` is the single entry point: it installs a genesis
//! on a fresh database, verifies a supplied genesis against a stored one,
//! and reconciles the chain configuration, refusing incompatible changes
//! with a typed error.

use once_cell::sync::Lazy;

use phoenix_config::{ChainConfig, GenesisSpec};
use phoenix_core::{Block, Header, H256};
use phoenix_storage::Database;
use tracing::info;

use crate::error::{LedgerError, Result};
use crate::rawdb;

static MAINNET_GENESIS_HASH: Lazy<H256> =
    Lazy::new(|| genesis_block(&GenesisSpec::mainnet()).hash());

/// Hash of the embedded main-network genesis block.
pub fn mainnet_genesis_hash() -> H256 {
    *MAINNET_GENESIS_HASH
}

/// Builds the genesis block described by a spec. The allocation is
/// committed into the state root; the chain config is stored separately
/// and does not affect the hash.
pub fn genesis_block(spec: &GenesisSpec) -> Block {
    let alloc_encoding = bincode::serialize(&spec.alloc).unwrap_or_default();
    let header = Header {
        parent_hash: spec.parent_hash,
        number: 0,
        timestamp: spec.timestamp,
        coinbase: spec.coinbase,
        state_root: H256::hash_of(&alloc_encoding),
        tx_root: H256::zero(),
        gas_limit: spec.gas_limit,
        gas_used: 0,
        extra: spec.extra_data.clone(),
    };
    Block::new(header, Vec::new())
}

fn commit(db: &dyn Database, spec: &GenesisSpec) -> Result<(ChainConfig, H256)> {
    let block = genesis_block(spec);
    let hash = block.hash();
    rawdb::write_canonical_block(db, &block)?;
    rawdb::write_chain_config(db, &hash, &spec.config)?;
    info!(%hash, chain_id = spec.config.chain_id, "genesis block installed");
    Ok((spec.config.clone(), hash))
}

/// Installs or reconciles the genesis block.
///
/// Fresh database: commits the supplied spec, or the embedded mainnet one
/// when none is given. Existing database: a supplied spec must build the
/// stored block, and its configuration must be compatible with the stored
/// one; the supplied configuration is then persisted so reconcilable
/// fields move forward.
pub fn setup_genesis_block(
    db: &dyn Database,
    spec: Option<&GenesisSpec>,
) -> Result<(ChainConfig, H256)> {
    let stored = rawdb::read_canonical_hash(db, 0)?;

    let Some(stored) = stored else {
        return match spec {
            Some(spec) => commit(db, spec),
            None => commit(db, &GenesisSpec::mainnet()),
        };
    };

    match spec {
        Some(spec) => {
            let supplied = genesis_block(spec).hash();
            if supplied != stored {
                return Err(LedgerError::GenesisMismatch { stored, supplied });
            }
            let stored_config = rawdb::read_chain_config(db, &stored)?
                .ok_or(LedgerError::MissingChainConfig(stored))?;
            if !spec.config.is_compatible_with(&stored_config) {
                return Err(LedgerError::ConfigCompat {
                    reason: format!(
                        "stored chain {} cannot become chain {}",
                        stored_config.chain_id, spec.config.chain_id
                    ),
                });
            }
            rawdb::write_chain_config(db, &stored, &spec.config)?;
            Ok((spec.config.clone(), stored))
        }
        None => {
            if let Some(config) = rawdb::read_chain_config(db, &stored)? {
                return Ok((config, stored));
            }
            if stored == mainnet_genesis_hash() {
                let config = GenesisSpec::mainnet().config;
                rawdb::write_chain_config(db, &stored, &config)?;
                return Ok((config, stored));
            }
            Err(LedgerError::MissingChainConfig(stored))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_config::{PbftChainConfig, ValidatorMode};
    use phoenix_storage::MemoryStore;

    fn spec(chain_id: u64) -> GenesisSpec {
        let mut spec = GenesisSpec::default_private();
        spec.config.chain_id = chain_id;
        spec.config.pbft = Some(PbftChainConfig {
            period: 3,
            amount: 10,
            validator_mode: ValidatorMode::Static,
            initial_nodes: Vec::new(),
        });
        spec
    }

    #[test]
    fn fresh_database_installs_supplied_spec() {
        let db = MemoryStore::new();
        let (config, hash) = setup_genesis_block(&db, Some(&spec(7))).unwrap();
        assert_eq!(config.chain_id, 7);
        assert_eq!(rawdb::read_canonical_hash(&db, 0).unwrap(), Some(hash));
        assert_eq!(rawdb::read_head_number(&db).unwrap(), Some(0));
    }

    #[test]
    fn fresh_database_defaults_to_mainnet() {
        let db = MemoryStore::new();
        let (config, hash) = setup_genesis_block(&db, None).unwrap();
        assert_eq!(hash, mainnet_genesis_hash());
        assert_eq!(config.chain_id, GenesisSpec::mainnet().config.chain_id);
    }

    #[test]
    fn same_spec_reconciles_quietly() {
        let db = MemoryStore::new();
        let (_, first) = setup_genesis_block(&db, Some(&spec(7))).unwrap();
        let (_, second) = setup_genesis_block(&db, Some(&spec(7))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_genesis_block_is_a_mismatch() {
        let db = MemoryStore::new();
        setup_genesis_block(&db, Some(&spec(7))).unwrap();
        let mut other = spec(7);
        other.timestamp = 12345;
        assert!(matches!(
            setup_genesis_block(&db, Some(&other)),
            Err(LedgerError::GenesisMismatch { .. })
        ));
    }

    #[test]
    fn incompatible_config_is_typed() {
        let db = MemoryStore::new();
        setup_genesis_block(&db, Some(&spec(7))).unwrap();
        // Same genesis block, different chain identity.
        let err = setup_genesis_block(&db, Some(&spec(8))).unwrap_err();
        assert!(err.is_config_compat());
    }

    #[test]
    fn reconcilable_fields_move_forward() {
        let db = MemoryStore::new();
        let mut v1 = spec(7);
        if let Some(pbft) = v1.config.pbft.as_mut() {
            pbft.period = 0;
            pbft.amount = 0;
        }
        let (_, hash) = setup_genesis_block(&db, Some(&v1)).unwrap();

        let (config, _) = setup_genesis_block(&db, Some(&spec(7))).unwrap();
        assert_eq!(config.pbft.as_ref().unwrap().period, 3);
        assert_eq!(
            rawdb::read_chain_config(&db, &hash)
                .unwrap()
                .unwrap()
                .pbft
                .unwrap()
                .period,
            3
        );
    }

    #[test]
    fn stored_chain_without_spec_reuses_config() {
        let db = MemoryStore::new();
        setup_genesis_block(&db, Some(&spec(7))).unwrap();
        let (config, _) = setup_genesis_block(&db, None).unwrap();
        assert_eq!(config.chain_id, 7);
    }
}
