//! Chain database key schema and typed accessors.
//!
//! All higher layers go through these functions; nothing else writes raw
//! keys into the chain database.

use phoenix_config::ChainConfig;
use phoenix_core::{Block, Header, H256};
use phoenix_storage::{Database, WriteBatch};

use crate::error::{LedgerError, Result};

/// Version of the on-disk schema this binary writes.
pub const CHAIN_DB_VERSION: u64 = 8;

/// Key of the stored schema version.
pub const DATABASE_VERSION_KEY: &[u8] = b"database-version";

const HEAD_HEADER_KEY: &[u8] = b"head-header";
const HEAD_BLOCK_KEY: &[u8] = b"head-block";
const CANONICAL_PREFIX: &[u8] = b"canonical:";
const HEADER_PREFIX: &[u8] = b"header:";
const BLOCK_PREFIX: &[u8] = b"block:";
const CONFIG_PREFIX: &[u8] = b"chain-config:";

fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = CANONICAL_PREFIX.to_vec();
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn header_key(hash: &H256) -> Vec<u8> {
    let mut key = HEADER_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

fn block_key(hash: &H256) -> Vec<u8> {
    let mut key = BLOCK_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

fn config_key(genesis: &H256) -> Vec<u8> {
    let mut key = CONFIG_PREFIX.to_vec();
    key.extend_from_slice(genesis.as_bytes());
    key
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| LedgerError::Encoding(e.to_string()))
}

fn decode<T: for<'de> serde::Deserialize<'de>>(raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| LedgerError::Encoding(e.to_string()))
}

/// Stored schema version, if the database has ever been written.
pub fn read_database_version(db: &dyn Database) -> Result<Option<u64>> {
    match db.get(DATABASE_VERSION_KEY)? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

pub fn write_database_version(db: &dyn Database, version: u64) -> Result<()> {
    db.put(DATABASE_VERSION_KEY, &encode(&version)?)?;
    Ok(())
}

/// Hash of the canonical block at `number`.
pub fn read_canonical_hash(db: &dyn Database, number: u64) -> Result<Option<H256>> {
    match db.get(&canonical_key(number))? {
        Some(raw) => Ok(Some(
            H256::from_slice(&raw).map_err(|e| LedgerError::Encoding(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

pub fn read_head_header_hash(db: &dyn Database) -> Result<Option<H256>> {
    match db.get(HEAD_HEADER_KEY)? {
        Some(raw) => Ok(Some(
            H256::from_slice(&raw).map_err(|e| LedgerError::Encoding(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

pub fn read_header(db: &dyn Database, hash: &H256) -> Result<Option<Header>> {
    match db.get(&header_key(hash))? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

pub fn read_block(db: &dyn Database, hash: &H256) -> Result<Option<Block>> {
    match db.get(&block_key(hash))? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

/// Canonical header at `number`.
pub fn read_canonical_header(db: &dyn Database, number: u64) -> Result<Option<Header>> {
    match read_canonical_hash(db, number)? {
        Some(hash) => read_header(db, &hash),
        None => Ok(None),
    }
}

/// Canonical block at `number`.
pub fn read_canonical_block(db: &dyn Database, number: u64) -> Result<Option<Block>> {
    match read_canonical_hash(db, number)? {
        Some(hash) => read_block(db, &hash),
        None => Ok(None),
    }
}

/// Height of the current head header, if a head exists.
pub fn read_head_number(db: &dyn Database) -> Result<Option<u64>> {
    let Some(hash) = read_head_header_hash(db)? else {
        return Ok(None);
    };
    Ok(read_header(db, &hash)?.map(|h| h.number))
}

pub fn read_chain_config(db: &dyn Database, genesis: &H256) -> Result<Option<ChainConfig>> {
    match db.get(&config_key(genesis))? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

pub fn write_chain_config(db: &dyn Database, genesis: &H256, config: &ChainConfig) -> Result<()> {
    db.put(&config_key(genesis), &encode(config)?)?;
    Ok(())
}

/// Writes a block's header and body without touching the canonical index.
pub fn write_block(db: &dyn Database, block: &Block) -> Result<()> {
    let hash = block.hash();
    let mut batch = WriteBatch::new();
    batch.put(header_key(&hash), encode(&block.header)?);
    batch.put(block_key(&hash), encode(block)?);
    db.write(batch)?;
    Ok(())
}

/// Writes a block and makes it canonical head, atomically.
pub fn write_canonical_block(db: &dyn Database, block: &Block) -> Result<()> {
    let hash = block.hash();
    let mut batch = WriteBatch::new();
    batch.put(header_key(&hash), encode(&block.header)?);
    batch.put(block_key(&hash), encode(block)?);
    batch.put(canonical_key(block.number()), hash.as_bytes().to_vec());
    batch.put(HEAD_HEADER_KEY.to_vec(), hash.as_bytes().to_vec());
    batch.put(HEAD_BLOCK_KEY.to_vec(), hash.as_bytes().to_vec());
    db.write(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::{Address, Transaction};
    use phoenix_storage::MemoryStore;

    fn block(number: u64, parent: H256) -> Block {
        Block::new(
            Header {
                parent_hash: parent,
                number,
                timestamp: number * 1000,
                coinbase: Address::ZERO,
                state_root: H256::zero(),
                tx_root: H256::zero(),
                gas_limit: 100_800_000,
                gas_used: 0,
                extra: Vec::new(),
            },
            vec![Transaction {
                from: Address([1; 20]),
                to: None,
                nonce: number,
                gas: 21_000,
                gas_price: 1,
                value: 0,
                input: Vec::new(),
            }],
        )
    }

    #[test]
    fn canonical_write_updates_head_pointers() {
        let db = MemoryStore::new();
        let b1 = block(1, H256([0; 32]));
        write_canonical_block(&db, &b1).unwrap();

        assert_eq!(read_head_header_hash(&db).unwrap(), Some(b1.hash()));
        assert_eq!(read_head_number(&db).unwrap(), Some(1));
        assert_eq!(read_canonical_hash(&db, 1).unwrap(), Some(b1.hash()));
        assert_eq!(read_canonical_block(&db, 1).unwrap(), Some(b1.clone()));
        assert_eq!(read_header(&db, &b1.hash()).unwrap(), Some(b1.header));
    }

    #[test]
    fn version_round_trip() {
        let db = MemoryStore::new();
        assert_eq!(read_database_version(&db).unwrap(), None);
        write_database_version(&db, CHAIN_DB_VERSION).unwrap();
        assert_eq!(
            read_database_version(&db).unwrap(),
            Some(CHAIN_DB_VERSION)
        );
    }

    #[test]
    fn config_keyed_by_genesis_hash() {
        let db = MemoryStore::new();
        let g1 = H256([1; 32]);
        let g2 = H256([2; 32]);
        let cfg = ChainConfig {
            chain_id: 7,
            pbft: None,
        };
        write_chain_config(&db, &g1, &cfg).unwrap();
        assert_eq!(read_chain_config(&db, &g1).unwrap(), Some(cfg));
        assert_eq!(read_chain_config(&db, &g2).unwrap(), None);
    }
}
