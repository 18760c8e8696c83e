//! Persisted chain configuration.
//!
//! A [`ChainConfig`] is stored in the chain database keyed by the genesis
//! hash. Nodes joining a network must present a compatible configuration;
//! the ledger crate performs that check.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use phoenix_core::ValidatorNode;

use crate::error::ConfigError;

/// How the validator set for each round is determined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    /// Fixed list taken from the genesis configuration.
    #[default]
    Static,
    /// Rotating schedule over the initial validators.
    Inner,
    /// Delegated proof of stake, selected from staking state.
    Dpos,
}

impl FromStr for ValidatorMode {
    type Err = ConfigError;

    // The empty string means the operator did not choose; treat as static.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "static" => Ok(ValidatorMode::Static),
            "inner" => Ok(ValidatorMode::Inner),
            "dpos" => Ok(ValidatorMode::Dpos),
            other => Err(ConfigError::UnknownValidatorMode(other.to_string())),
        }
    }
}

impl fmt::Display for ValidatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidatorMode::Static => "static",
            ValidatorMode::Inner => "inner",
            ValidatorMode::Dpos => "dpos",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for ValidatorMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// PBFT section of the chain configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbftChainConfig {
    /// Target seconds between blocks sealed by one validator.
    pub period: u64,
    /// Number of consecutive blocks each validator seals per turn.
    pub amount: u32,
    /// Validator selection mode. Empty input parses as static.
    pub validator_mode: ValidatorMode,
    /// The validators the network starts with.
    pub initial_nodes: Vec<ValidatorNode>,
}

/// Chain configuration persisted with the genesis block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Network-wide chain identifier.
    pub chain_id: u64,
    /// PBFT consensus parameters, absent on chains using another engine.
    pub pbft: Option<PbftChainConfig>,
}

impl ChainConfig {
    /// Fields that must match between a stored and a supplied config.
    /// Period and amount are reconcilable (zeros get filled in), the rest
    /// are identity-defining.
    pub fn is_compatible_with(&self, stored: &ChainConfig) -> bool {
        if self.chain_id != stored.chain_id {
            return false;
        }
        match (&self.pbft, &stored.pbft) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a.validator_mode == b.validator_mode && a.initial_nodes == b.initial_nodes
            }
            _ => false,
        }
    }
}
