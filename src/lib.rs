//! Phoenix chain umbrella crate.
//!
//! Re-exports the component crates under one name so downstream code can
//! depend on `phoenix-chain` alone. The node binary and service live in
//! the `phoenix-node` crate.

pub use phoenix_config as config;
pub use phoenix_consensus as consensus;
pub use phoenix_core as core;
pub use phoenix_ledger as ledger;
pub use phoenix_pos as pos;
pub use phoenix_snapshotdb as snapshotdb;
pub use phoenix_storage as storage;
