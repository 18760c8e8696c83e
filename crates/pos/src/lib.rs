//! Proof-of-stake machinery: the reactor, its plugins, and governance
//! parameters.
//!
//! The reactor hosts a registry of plugins and runs them against each
//! block in configured begin- and end-of-block orders. Plugin state lives
//! in the snapshot database, layered per block and committed when the
//! block is final.

pub mod error;
pub mod gov;
pub mod plugin;
pub mod reactor;
pub mod restricting;
pub mod reward;
pub mod slashing;
pub mod staking;
pub mod vrf;

pub use error::{PosError, Result};
pub use gov::GovernancePlugin;
pub use plugin::{PosPlugin, RuleTag};
pub use reactor::Reactor;
pub use restricting::RestrictingPlugin;
pub use reward::RewardPlugin;
pub use slashing::SlashingPlugin;
pub use staking::StakingPlugin;
pub use vrf::VrfHandler;
