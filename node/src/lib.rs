//! Full node assembly: wires storage, consensus, the validator
//! reactor, chain, transaction pool, miner and protocol manager into a
//! single service with an ordered start and stop.

pub mod apis;
pub mod context;
pub mod error;
pub mod executor;
pub mod light;
pub mod miner;
pub mod network;
pub mod protocol;
pub mod recovery;
pub mod service;

pub use context::ServiceContext;
pub use error::{NodeError, Result};
pub use executor::{AccountState, StateExecutor};
pub use light::{BasicLightServer, LightServer};
pub use miner::Miner;
pub use network::{InProcServer, NetworkServer};
pub use protocol::ProtocolManager;
pub use recovery::{run_recovery_gate, RecoveryOutcome};
pub use service::NodeService;
