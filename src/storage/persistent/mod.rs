//! Durable journal (feature `persistent`).
//!
//! A store directory holds two files:
//! - `tessera.wal`: the write-ahead log of schema and commit entries
//! - `.lock`: held exclusively while the store is open
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              PersistentJournal                │
//! ├──────────────────────────────────────────────┤
//! │  ┌─────────────────┐   ┌──────────────────┐  │
//! │  │ WriteAheadLog   │   │ FileLock (flock) │  │
//! │  │ (append-only)   │   │                  │  │
//! │  └─────────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod wal;

pub use file_lock::{FileLock, LOCK_FILE};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use crate::config::PersistentConfig;
use crate::error::DbResult;
use crate::schema::Schema;
use crate::storage::{StorageError, TxJournal, TxRecord};

/// Name of the log file inside a store directory.
pub const WAL_FILE: &str = "tessera.wal";

/// A [`TxJournal`] backed by a write-ahead log on disk.
pub struct PersistentJournal {
    wal: WriteAheadLog,
    _lock: FileLock,
}

impl PersistentJournal {
    /// Opens or creates the store in `dir` for `schema`.
    ///
    /// Returns the journal together with the transactions to replay, in
    /// commit order.
    ///
    /// # Errors
    ///
    /// - `Storage(Locked)` if another process has the store open
    /// - `Storage(CorruptedLog)` if the log file is damaged before its final
    ///   entry; the file is left as found
    /// - `Schema(Incompatible)` if `schema` does not extend the stored one
    /// - `Storage` for any I/O failure
    pub fn open(
        dir: &Path,
        schema: &Schema,
        config: &PersistentConfig,
    ) -> DbResult<(Self, Vec<TxRecord>)> {
        std::fs::create_dir_all(dir).map_err(StorageError::from)?;
        let lock = FileLock::acquire(dir).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                StorageError::Locked(dir.display().to_string())
            } else {
                StorageError::from(e)
            }
        })?;

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| {
                if e.kind() == ErrorKind::InvalidData {
                    StorageError::CorruptedLog(e.to_string())
                } else {
                    StorageError::from(e)
                }
            })?;

        let mut stored = None;
        let mut records = Vec::new();
        for entry in entries {
            match entry.kind {
                WalEntryKind::Schema { attributes } => stored = Some(attributes),
                WalEntryKind::Commit(record) => records.push(record),
            }
        }

        let current: Vec<_> = schema.user_attributes().cloned().collect();
        match &stored {
            Some(stored) => schema.check_extends(stored)?,
            None if !records.is_empty() => {
                return Err(StorageError::CorruptedLog(
                    "journal has commits but no schema entry".to_string(),
                )
                .into());
            }
            None => {}
        }
        if stored.as_ref().map_or(true, |s| s.len() < current.len()) {
            wal.append(WalEntryKind::Schema {
                attributes: current,
            })
            .map_err(StorageError::from)?;
        }

        info!(
            dir = %dir.display(),
            transactions = records.len(),
            "journal opened"
        );
        Ok((Self { wal, _lock: lock }, records))
    }

    /// Path of the log file.
    #[must_use]
    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }
}

impl TxJournal for PersistentJournal {
    fn append(&self, record: &TxRecord) -> Result<(), StorageError> {
        self.wal.append(WalEntryKind::Commit(record.clone()))?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
