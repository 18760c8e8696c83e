//! The plugin contract and rule tags.

use std::fmt;

use phoenix_core::{Block, Header, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::Result;

/// Names a slot in the begin/end rule orders. Every registered plugin has
/// a tag; `CollectDeclareVersion` is a rule-only step the reactor runs
/// itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleTag {
    Staking,
    Slashing,
    Restricting,
    Reward,
    Governance,
    CollectDeclareVersion,
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleTag::Staking => "staking",
            RuleTag::Slashing => "slashing",
            RuleTag::Restricting => "restricting",
            RuleTag::Reward => "reward",
            RuleTag::Governance => "governance",
            RuleTag::CollectDeclareVersion => "collect-declare-version",
        };
        f.write_str(name)
    }
}

/// A proof-of-stake plugin.
///
/// `block_hash` names the pending snapshot layer the plugin writes into;
/// the layer is committed once the block is final.
pub trait PosPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the block's transactions.
    fn begin_block(&self, block_hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()>;

    /// Runs after the block's transactions.
    fn end_block(&self, block_hash: &H256, header: &Header, snap: &SnapshotDb) -> Result<()>;

    /// Runs once the block is final.
    fn confirmed(&self, block: &Block) -> Result<()> {
        let _ = block;
        Ok(())
    }
}
