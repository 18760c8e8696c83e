//! Genesis block specification.
//!
//! Parsed from a JSON file or taken from one of the embedded network
//! presets. The ledger crate turns a spec into the actual genesis block
//! and persists it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use phoenix_core::{Address, H256};

use crate::chain::{ChainConfig, PbftChainConfig, ValidatorMode};
use crate::error::Result;

mod hex_bytes {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let stripped = s.strip_prefix("0x").unwrap_or(&s);
            hex::decode(stripped).map_err(D::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

/// Balance and nonce of a pre-funded account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisAccount {
    pub balance: u128,
    pub nonce: u64,
}

/// Everything needed to build block zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisSpec {
    /// Chain configuration stored alongside the genesis block.
    pub config: ChainConfig,
    /// Seed value; the delegated-PoS selection derives its VRF input here.
    pub nonce: u64,
    /// Genesis timestamp in milliseconds.
    pub timestamp: u64,
    /// Arbitrary extra data embedded in the genesis header.
    #[serde(with = "hex_bytes")]
    pub extra_data: Vec<u8>,
    /// Gas limit of the genesis block.
    pub gas_limit: u64,
    /// Coinbase of the genesis block.
    pub coinbase: Address,
    /// Pre-funded accounts.
    pub alloc: BTreeMap<Address, GenesisAccount>,
    /// Parent hash, zero for a true genesis.
    pub parent_hash: H256,
}

impl GenesisSpec {
    /// Loads a genesis spec from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The embedded main-network genesis.
    pub fn mainnet() -> Self {
        Self {
            config: ChainConfig {
                chain_id: 100,
                pbft: Some(PbftChainConfig {
                    period: 1,
                    amount: 10,
                    validator_mode: ValidatorMode::Dpos,
                    initial_nodes: Vec::new(),
                }),
            },
            nonce: 0x50686f656e6978,
            timestamp: 0,
            extra_data: b"Phoenix Chain Mainnet".to_vec(),
            gas_limit: 100_800_000,
            coinbase: Address::ZERO,
            alloc: BTreeMap::new(),
            parent_hash: H256::ZERO,
        }
    }

    /// The default private-network genesis, used when a node's on-disk
    /// chain is neither mainnet nor described by an operator-supplied file.
    /// Period and amount are left zero so the node's own settings apply.
    pub fn default_private() -> Self {
        Self {
            config: ChainConfig {
                chain_id: 102,
                pbft: Some(PbftChainConfig {
                    period: 0,
                    amount: 0,
                    validator_mode: ValidatorMode::Static,
                    initial_nodes: Vec::new(),
                }),
            },
            nonce: 1,
            timestamp: 0,
            extra_data: Vec::new(),
            gas_limit: 100_800_000,
            coinbase: Address::ZERO,
            alloc: BTreeMap::new(),
            parent_hash: H256::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_with_hex_extra() {
        let mut spec = GenesisSpec::default_private();
        spec.extra_data = vec![0xde, 0xad];
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"0xdead\""));
        let back: GenesisSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn loads_operator_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        std::fs::write(
            &path,
            r#"{
                "config": {
                    "chain_id": 7,
                    "pbft": { "period": 3, "amount": 10, "validator_mode": "" }
                },
                "gas_limit": 1000000
            }"#,
        )
        .unwrap();
        let spec = GenesisSpec::from_file(&path).unwrap();
        assert_eq!(spec.config.chain_id, 7);
        let pbft = spec.config.pbft.unwrap();
        assert_eq!(pbft.validator_mode, ValidatorMode::Static);
        assert_eq!(pbft.period, 3);
    }

    #[test]
    fn presets_differ() {
        assert_ne!(
            GenesisSpec::mainnet().config.chain_id,
            GenesisSpec::default_private().config.chain_id
        );
    }
}
