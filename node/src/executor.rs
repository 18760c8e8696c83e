//! Block execution against the snapshot database.
//!
//! The chain cache drives this through [`BlockExecutor`]: execution opens
//! a pending snapshot layer keyed by the block hash and writes the
//! resulting account state into it. Committing or discarding the layer is
//! the caller's decision, which is what lets the import path drop the
//! work of blocks that lose a reorg.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use phoenix_core::{Address, Block, ExecutionError, Header, H256};
use phoenix_ledger::BlockExecutor;
use phoenix_snapshotdb::SnapshotDb;

const ACCOUNT_PREFIX: &[u8] = b"account:";

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = ACCOUNT_PREFIX.to_vec();
    key.extend_from_slice(address.as_bytes());
    key
}

/// Balance and nonce of one account as stored in the snapshot layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u128,
    pub nonce: u64,
}

/// Executes blocks into pending snapshot layers.
pub struct StateExecutor {
    snapshot: Arc<SnapshotDb>,
}

impl StateExecutor {
    pub fn new(snapshot: Arc<SnapshotDb>) -> Self {
        Self { snapshot }
    }

    /// Reads an account through the pending layer at `at`, falling back to
    /// committed state.
    pub fn account(&self, at: Option<&H256>, address: &Address) -> Option<AccountState> {
        let raw = self.snapshot.get(at, &account_key(address)).ok()??;
        bincode::deserialize(&raw).ok()
    }

    fn fail(block: &Block, reason: impl Into<String>) -> ExecutionError {
        ExecutionError::Execute {
            number: block.header.number,
            hash: block.hash(),
            reason: reason.into(),
        }
    }

    fn load(
        &self,
        block: &Block,
        hash: &H256,
        address: &Address,
    ) -> std::result::Result<AccountState, ExecutionError> {
        let raw = self
            .snapshot
            .get(Some(hash), &account_key(address))
            .map_err(|e| Self::fail(block, e.to_string()))?;
        match raw {
            Some(raw) => {
                bincode::deserialize(&raw).map_err(|e| Self::fail(block, e.to_string()))
            }
            None => Ok(AccountState::default()),
        }
    }

    fn store(
        &self,
        block: &Block,
        hash: &H256,
        address: &Address,
        state: &AccountState,
    ) -> std::result::Result<(), ExecutionError> {
        let encoded =
            bincode::serialize(state).map_err(|e| Self::fail(block, e.to_string()))?;
        self.snapshot
            .put(hash, &account_key(address), &encoded)
            .map_err(|e| Self::fail(block, e.to_string()))
    }
}

impl BlockExecutor for StateExecutor {
    fn execute(&self, block: &Block, parent: &Header) -> std::result::Result<(), ExecutionError> {
        if block.header.parent_hash != parent.hash() {
            return Err(Self::fail(
                block,
                format!("parent mismatch, expected {}", parent.hash()),
            ));
        }

        let hash = block.hash();
        self.snapshot
            .new_block(block.header.number, hash)
            .map_err(|e| Self::fail(block, e.to_string()))?;

        for tx in &block.transactions {
            let mut sender = self.load(block, &hash, &tx.from)?;
            if tx.nonce != sender.nonce {
                return Err(Self::fail(
                    block,
                    format!(
                        "nonce gap for {}: tx {} state {}",
                        tx.from, tx.nonce, sender.nonce
                    ),
                ));
            }
            sender.nonce += 1;
            if sender.balance < tx.value {
                return Err(Self::fail(
                    block,
                    format!("insufficient balance for {}", tx.from),
                ));
            }
            sender.balance -= tx.value;
            self.store(block, &hash, &tx.from, &sender)?;

            if let Some(to) = tx.to {
                let mut receiver = self.load(block, &hash, &to)?;
                receiver.balance += tx.value;
                self.store(block, &hash, &to, &receiver)?;
            }
        }

        debug!(
            number = block.header.number,
            txs = block.transactions.len(),
            "block executed"
        );
        Ok(())
    }
}
