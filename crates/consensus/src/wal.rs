//! Write-ahead log for in-flight consensus messages.
//!
//! Records are length-prefixed frames in a single journal file. Replay
//! on open tolerates a truncated final frame, which is what a crash
//! mid-append leaves behind.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConsensusError, Result};

/// Directory name of the consensus journal under the data directory.
pub const WAL_PATH: &str = "wal";

const JOURNAL_FILE: &str = "wal.journal";

/// Append-only journal of consensus records.
pub struct Wal {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if missing) the journal under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| ConsensusError::Wal(e.to_string()))?;
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConsensusError::Wal(e.to_string()))?;
        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
        })
    }

    /// Reads back every complete record in the journal.
    pub fn replay(&self) -> Result<Vec<Vec<u8>>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ConsensusError::Wal(e.to_string())),
        };
        let mut records = Vec::new();
        let mut cursor = &raw[..];
        loop {
            let mut len_buf = [0u8; 4];
            match cursor.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(_) => break,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if cursor.len() < len {
                warn!(path = %self.path.display(), "dropping truncated journal tail");
                break;
            }
            records.push(cursor[..len].to_vec());
            cursor = &cursor[len..];
        }
        debug!(records = records.len(), "replayed consensus journal");
        Ok(records)
    }

    /// Appends one record and flushes it to the OS.
    pub fn append(&self, record: &[u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(ConsensusError::NotStarted)?;
        let len = (record.len() as u32).to_le_bytes();
        file.write_all(&len)
            .and_then(|_| file.write_all(record))
            .and_then(|_| file.flush())
            .map_err(|e| ConsensusError::Wal(e.to_string()))
    }

    /// Syncs the journal to disk and closes it. Idempotent.
    pub fn close(&self) -> Result<()> {
        if let Some(file) = self.file.lock().take() {
            file.sync_all().map_err(|e| ConsensusError::Wal(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path()).unwrap();
        wal.append(b"one").unwrap();
        wal.append(b"two").unwrap();
        wal.close().unwrap();

        let wal = Wal::open(dir.path()).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path()).unwrap();
        wal.append(b"kept").unwrap();
        wal.close().unwrap();

        // Simulate a crash mid-append: a frame header with missing body.
        let path = dir.path().join(JOURNAL_FILE);
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(b"partial");
        std::fs::write(&path, raw).unwrap();

        let wal = Wal::open(dir.path()).unwrap();
        assert_eq!(wal.replay().unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path()).unwrap();
        wal.close().unwrap();
        assert!(wal.append(b"x").is_err());
        // Close stays idempotent.
        wal.close().unwrap();
    }
}
