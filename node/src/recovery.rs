//! Aborted fast-sync detection and reset.
//!
//! A fast sync writes a status record into the snapshot base and removes
//! it only on completion. Finding the record at startup means the previous
//! run died mid-sync and left half-written state; the only safe move is to
//! wipe every store the sync touched and begin again from genesis.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use phoenix_config::{GenesisSpec, NodeConfig};
use phoenix_core::H256;
use phoenix_ledger::{mainnet_genesis_hash, rawdb};
use phoenix_snapshotdb::FAST_SYNC_STATUS_KEY;
use phoenix_storage::Database;

use crate::context::ServiceContext;
use crate::error::{NodeError, Result};

/// Handles to continue assembly with, after the gate has run.
pub struct RecoveryOutcome {
    pub chain_db: Arc<dyn Database>,
    pub snapshot_base: Arc<dyn Database>,
    /// Genesis read back from disk when the wiped chain was private and
    /// the operator supplied none.
    pub genesis: Option<GenesisSpec>,
    /// True when an aborted sync was found and the stores were reset.
    pub wiped: bool,
}

/// Checks for an aborted fast sync and resets the node's stores if one is
/// found. On a clean startup the gate touches nothing and hands back the
/// databases it was given.
pub fn run_recovery_gate(
    ctx: &ServiceContext,
    config: &NodeConfig,
    chain_db: Arc<dyn Database>,
    snapshot_base: Arc<dyn Database>,
) -> Result<RecoveryOutcome> {
    let untouched = |chain_db, snapshot_base| RecoveryOutcome {
        chain_db,
        snapshot_base,
        genesis: None,
        wiped: false,
    };

    let close_both = |chain_db: &Arc<dyn Database>, snapshot_base: &Arc<dyn Database>| {
        if let Err(e) = chain_db.close() {
            warn!(error = %e, "chain database close failed");
        }
        if let Err(e) = snapshot_base.close() {
            warn!(error = %e, "snapshot base close failed");
        }
    };

    match rawdb::read_head_number(chain_db.as_ref()) {
        Ok(None) | Ok(Some(0)) => return Ok(untouched(chain_db, snapshot_base)),
        Ok(Some(_)) => {}
        Err(e) => {
            close_both(&chain_db, &snapshot_base);
            return Err(e.into());
        }
    }

    match snapshot_base.get(FAST_SYNC_STATUS_KEY) {
        Ok(None) => return Ok(untouched(chain_db, snapshot_base)),
        Ok(Some(_)) => {}
        Err(e) => {
            close_both(&chain_db, &snapshot_base);
            return Err(e.into());
        }
    }

    warn!("aborted fast sync detected, resetting chain state");

    // The genesis hash decides below whether a private genesis file must
    // exist; it has to be read while the database is still open.
    let stored_genesis = rawdb::read_canonical_hash(chain_db.as_ref(), 0)?;

    drop_store(chain_db)?;
    drop_store(snapshot_base)?;

    remove_dir(&ctx.chaindata_dir())?;
    remove_dir(&ctx.freezer_dir(&config.database))?;
    remove_dir(&ctx.wal_dir())?;
    remove_dir(&ctx.snapshot_dir())?;

    let chain_db = ctx.open_chain_database(&config.database)?;
    let snapshot_base = ctx.open_snapshot_base(&config.database)?;

    let genesis = recover_private_genesis(ctx, config, stored_genesis)?;

    info!(
        reinstalled_genesis = genesis.is_some(),
        "chain state reset complete"
    );
    Ok(RecoveryOutcome {
        chain_db,
        snapshot_base,
        genesis,
        wiped: true,
    })
}

fn drop_store(store: Arc<dyn Database>) -> Result<()> {
    store.close()?;
    drop(store);
    Ok(())
}

/// A wiped private chain cannot rebuild without its genesis. When the
/// operator supplied none and the stored chain was not mainnet, the genesis
/// file at the well-known location is required.
fn recover_private_genesis(
    ctx: &ServiceContext,
    config: &NodeConfig,
    stored_genesis: Option<H256>,
) -> Result<Option<GenesisSpec>> {
    if config.genesis.is_some() {
        return Ok(None);
    }
    let Some(stored) = stored_genesis else {
        return Ok(None);
    };
    if stored == mainnet_genesis_hash() {
        return Ok(None);
    }
    let path = ctx.genesis_path();
    let spec = GenesisSpec::from_file(&path).map_err(|e| {
        NodeError::Recovery(format!(
            "private chain {} needs its genesis at {}: {}",
            stored,
            path.display(),
            e
        ))
    })?;
    info!(path = %path.display(), "recovered private genesis");
    Ok(Some(spec))
}

/// Removes a directory by renaming it aside first, so a crash mid-removal
/// never leaves a half-deleted store that looks openable.
fn remove_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let mut wiped = path.as_os_str().to_os_string();
    wiped.push(".wiped");
    let wiped = Path::new(&wiped);
    // A crash between rename and removal leaves this behind.
    let _ = fs::remove_dir_all(wiped);
    fs::rename(path, wiped)?;
    fs::remove_dir_all(wiped)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn remove_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        remove_dir(&dir.path().join("nothing-here")).unwrap();
    }

    #[test]
    fn remove_clears_leftover_move_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("store");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("x"), b"1").unwrap();
        let leftover = dir.path().join("store.wiped");
        fs::create_dir(&leftover).unwrap();
        fs::write(leftover.join("y"), b"2").unwrap();

        remove_dir(&target).unwrap();
        assert!(!target.exists());
        assert!(!leftover.exists());
    }
}
