//! PBFT consensus engine and validator-set selection.
//!
//! The engine seals and verifies headers; which validators are allowed to
//! seal at a given height comes from an [`Agency`], chosen once per node
//! start according to the configured validator mode.

pub mod agency;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod pbft;
pub mod wal;

pub use agency::{Agency, InnerAgency, StaticAgency};
pub use engine::{ConsensusEngine, PbftEngine, ProtocolSpec};
pub use error::{ConsensusError, Result};
pub use evidence::{decode_evidences, Evidence, EvidenceKind};
pub use pbft::Pbft;
pub use wal::{Wal, WAL_PATH};
