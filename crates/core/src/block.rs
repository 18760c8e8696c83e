//! Block, header, and transaction carrier types.
//!
//! These are the minimal shapes the assembly layer moves between the chain,
//! the transaction pool, and the consensus engine. Hashes are SHA-256 over
//! the binary encoding of the header.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{Address, H256};

/// Block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent block header.
    pub parent_hash: H256,
    /// Height of this block. The genesis block is height zero.
    pub number: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Address credited as the sealer of this block.
    pub coinbase: Address,
    /// Root of the state after executing this block.
    pub state_root: H256,
    /// Root committing to the transaction list.
    pub tx_root: H256,
    /// Gas ceiling for the block.
    pub gas_limit: u64,
    /// Gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Consensus-defined extra data, signatures included.
    pub extra: Vec<u8>,
}

impl Header {
    /// Hash of the encoded header.
    pub fn hash(&self) -> H256 {
        // Encoding a header cannot fail: every field is a plain value.
        let encoded = bincode::serialize(self).unwrap_or_default();
        H256::hash_of(&encoded)
    }
}

/// A block: header plus transaction list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Transactions in execution order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds a block from its parts.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Hash of the block, defined as the hash of its header.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Height of the block.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Parent hash of the block.
    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    /// Binary encoding used by the database layer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Decodes a block from its binary encoding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| CoreError::Encoding(e.to_string()))
    }
}

/// A transaction as the pool and the sealer see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender account.
    pub from: Address,
    /// Destination account, `None` for contract creation.
    pub to: Option<Address>,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas offered.
    pub gas: u64,
    /// Price per unit of gas.
    pub gas_price: u64,
    /// Transferred amount.
    pub value: u128,
    /// Call data.
    pub input: Vec<u8>,
}

impl Transaction {
    /// Hash of the encoded transaction.
    pub fn hash(&self) -> H256 {
        let encoded = bincode::serialize(self).unwrap_or_default();
        H256::hash_of(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            parent_hash: H256::zero(),
            number: 1,
            timestamp: 1_700_000_000_000,
            coinbase: Address([3u8; 20]),
            state_root: H256::zero(),
            tx_root: H256::zero(),
            gas_limit: 100_800_000,
            gas_used: 21_000,
            extra: vec![1, 2, 3],
        }
    }

    #[test]
    fn header_hash_is_stable() {
        let h = sample_header();
        assert_eq!(h.hash(), h.hash());
        let mut other = sample_header();
        other.number = 2;
        assert_ne!(h.hash(), other.hash());
    }

    #[test]
    fn block_encode_round_trip() {
        let block = Block::new(
            sample_header(),
            vec![Transaction {
                from: Address([1u8; 20]),
                to: Some(Address([2u8; 20])),
                nonce: 0,
                gas: 21_000,
                gas_price: 1_000_000_000,
                value: 42,
                input: Vec::new(),
            }],
        );
        let bytes = block.encode().unwrap();
        let back = Block::decode(&bytes).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.hash(), block.hash());
    }
}
