//! Configuration for a Phoenix Chain node.
//!
//! Three layers: [`NodeConfig`] is what the operator supplies (TOML file or
//! flags), [`ChainConfig`] is what gets persisted next to the genesis block,
//! and [`GenesisSpec`] describes the genesis block itself (JSON file or one
//! of the embedded networks).

pub mod chain;
pub mod error;
pub mod genesis;
pub mod node;

pub use chain::{ChainConfig, PbftChainConfig, ValidatorMode};
pub use error::{ConfigError, Result};
pub use genesis::{GenesisAccount, GenesisSpec};
pub use node::{
    DatabaseConfig, GasPriceOracleConfig, MinerConfig, NodeConfig, PbftOptions, SyncMode,
    TxPoolConfig,
};
