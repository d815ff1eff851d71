//! Storage seams for Tessera.
//!
//! The in-memory [`Log`](super::Log) is always the source of truth for reads.
//! A [`TxJournal`] decides whether committed transactions also survive the
//! process:
//! - [`MemoryJournal`] for tests and embedded, throwaway stores
//! - `PersistentJournal` (feature `persistent`) for a write-ahead log on disk

use thiserror::Error;

use super::memory::TxRecord;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The on-disk log does not describe a valid history.
    #[error("Corrupted log: {0}")]
    CorruptedLog(String),

    /// Another process holds the database lock.
    #[error("Database is locked: {0}")]
    Locked(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable record of committed transactions.
///
/// `append` is called by the transactor after a transaction has been fully
/// resolved and before it becomes visible. If `append` fails the transaction
/// is dropped and the store is left unchanged.
pub trait TxJournal: Send + Sync {
    /// Persist one committed transaction.
    fn append(&self, record: &TxRecord) -> Result<(), StorageError>;

    /// Returns true if appended records survive a restart.
    fn is_durable(&self) -> bool;
}

/// Journal that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryJournal;

impl TxJournal for MemoryJournal {
    fn append(&self, _record: &TxRecord) -> Result<(), StorageError> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
