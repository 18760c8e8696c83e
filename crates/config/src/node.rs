//! Operator-supplied node configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use phoenix_core::{Address, ValidatorNode};

use crate::error::Result;
use crate::genesis::GenesisSpec;

/// Block synchronization strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Download and execute every block.
    #[default]
    Full,
    /// Bulk-download state and recent blocks, then switch to full.
    Fast,
    /// Headers only; not runnable as a full service.
    Light,
}

/// Chain database parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Block cache budget in megabytes.
    pub cache_mb: usize,
    /// Maximum open file handles.
    pub handles: usize,
    /// Cold-storage directory. Relative paths resolve under the freezer
    /// root; empty means a single database directory.
    pub freezer: String,
    /// Skip the stored database version check on startup.
    pub skip_version_check: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cache_mb: 512,
            handles: 512,
            freezer: String::new(),
            skip_version_check: false,
        }
    }
}

/// Sealing parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Address credited in sealed blocks. May be left zero and set later.
    pub mining_address: Address,
    /// Lower bound for the gas limit of sealed blocks.
    pub gas_floor: u64,
    /// Upper bound requested for the gas limit of sealed blocks. The
    /// governance ceiling read from the snapshot layer caps it further.
    pub gas_ceil: u64,
    /// Minimum gas price accepted into sealed blocks.
    pub gas_price: u64,
    /// How often the sealer re-collects pending transactions.
    pub recommit: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            mining_address: Address::ZERO,
            gas_floor: 30_000_000,
            gas_ceil: 100_800_000,
            gas_price: 1_000_000_000,
            recommit: Duration::from_secs(3),
        }
    }
}

/// Transaction-pool parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPoolConfig {
    /// Journal file for locally submitted transactions, relative to the
    /// data directory. Empty disables journaling.
    pub journal: String,
    /// How often the journal is rewritten.
    pub rejournal: Duration,
    /// Minimum gas price for remote transactions.
    pub price_limit: u64,
    /// Executable slots guaranteed per account.
    pub account_slots: usize,
    /// Executable slots across all accounts.
    pub global_slots: usize,
    /// How long a queued transaction may wait before eviction.
    pub lifetime: Duration,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            journal: "transactions.journal".to_string(),
            rejournal: Duration::from_secs(3600),
            price_limit: 1,
            account_slots: 16,
            global_slots: 4096,
            lifetime: Duration::from_secs(3 * 3600),
        }
    }
}

/// Gas price oracle parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPriceOracleConfig {
    /// Number of recent blocks sampled.
    pub blocks: usize,
    /// Percentile of sampled prices suggested to callers.
    pub percentile: usize,
    /// Suggested price when no samples exist yet.
    pub default_price: u64,
}

impl Default for GasPriceOracleConfig {
    fn default() -> Self {
        Self {
            blocks: 20,
            percentile: 60,
            default_price: 1_000_000_000,
        }
    }
}

/// PBFT parameters the operator may override. Zero-valued period and
/// amount in the stored chain configuration are filled from here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbftOptions {
    /// Seconds between blocks when the chain config leaves it zero.
    pub period: u64,
    /// Blocks per validator turn when the chain config leaves it zero.
    pub amount: u32,
    /// Validators dialed on startup when this node participates.
    pub initial_nodes: Vec<ValidatorNode>,
}

impl Default for PbftOptions {
    fn default() -> Self {
        Self {
            period: 1,
            amount: 10,
            initial_nodes: Vec::new(),
        }
    }
}

/// Everything the operator controls about a node. Immutable once the
/// service is constructed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Network identifier announced to peers.
    pub network_id: u64,
    /// Synchronization strategy.
    pub sync_mode: SyncMode,
    /// Genesis specification. Absent means use the stored genesis, or the
    /// embedded mainnet one on a fresh directory.
    pub genesis: Option<GenesisSpec>,
    /// Chain database parameters.
    pub database: DatabaseConfig,
    /// Sealing parameters.
    pub miner: MinerConfig,
    /// Transaction-pool parameters.
    pub txpool: TxPoolConfig,
    /// Gas price oracle parameters.
    pub gpo: GasPriceOracleConfig,
    /// PBFT overrides.
    pub pbft: PbftOptions,
    /// Addresses whose blocks and transactions are treated as local.
    pub local_accounts: Vec<Address>,
    /// Percentage of time the light server may spend serving requests.
    /// Zero disables the light server.
    pub light_serv: u64,
    /// Peer slots reserved for light clients.
    pub light_peers: usize,
}

impl NodeConfig {
    /// Loads a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolves the transaction journal location under the data directory.
    /// Returns `None` when journaling is disabled.
    pub fn resolve_journal(&self, data_dir: &Path) -> Option<PathBuf> {
        if self.txpool.journal.is_empty() {
            return None;
        }
        Some(data_dir.join(&self.txpool.journal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.sync_mode, SyncMode::Full);
        assert!(cfg.miner.gas_floor <= cfg.miner.gas_ceil);
        assert!(cfg.pbft.period > 0);
        assert!(cfg.pbft.amount > 0);
    }

    #[test]
    fn journal_resolution() {
        let mut cfg = NodeConfig::default();
        let dir = Path::new("/tmp/phoenix");
        assert_eq!(
            cfg.resolve_journal(dir),
            Some(dir.join("transactions.journal"))
        );
        cfg.txpool.journal.clear();
        assert_eq!(cfg.resolve_journal(dir), None);
    }

    #[test]
    fn loads_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "network_id = 7\nsync_mode = \"fast\"\n\n[miner]\ngas_floor = 1000\n",
        )
        .unwrap();
        let cfg = NodeConfig::from_file(&path).unwrap();
        assert_eq!(cfg.network_id, 7);
        assert_eq!(cfg.sync_mode, SyncMode::Fast);
        assert_eq!(cfg.miner.gas_floor, 1000);
        // Unlisted fields keep their defaults.
        assert_eq!(cfg.miner.gas_ceil, MinerConfig::default().gas_ceil);
    }
}
