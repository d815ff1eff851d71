//! Write-ahead log of committed transactions.
//!
//! A transaction is appended (and optionally fsynced) before it becomes
//! visible in memory; on open the log is read back and replayed.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```
//!
//! A crash can leave a partially written last entry. Opening the log drops
//! that entry, so new entries are never appended after garbage. An entry that
//! fails to decode with more data after it is corruption, and the log refuses
//! to open without touching the file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::schema::Attribute;
use crate::storage::TxRecord;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    pub kind: WalEntryKind,
}

/// What a WAL entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// The user attributes of the store, in id order. Written when a store is
    /// created and whenever it is opened with an extended schema.
    Schema { attributes: Vec<Attribute> },
    /// One committed transaction.
    Commit(TxRecord),
}

struct Writer {
    file: File,
    /// Length of the valid prefix of the file.
    len: u64,
    sequence: u64,
    /// Set when a failed append could not be rolled back. The file may hold
    /// a stray entry, so nothing more is written.
    broken: bool,
}

/// Append-only, checksummed log file.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens or creates a log file, returning it with every entry that
    /// survived recovery.
    ///
    /// A torn final entry is truncated away with a warning.
    ///
    /// # Errors
    ///
    /// I/O errors, or `InvalidData` if the file is not a journal or an entry
    /// before the last one is corrupt.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (entries, valid_len) = if file.metadata()?.len() < codec::HEADER_LEN {
            // New file, or a crash while writing the header.
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (Vec::new(), codec::HEADER_LEN)
        } else {
            Self::recover(path, &file)?
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let sequence = entries.last().map_or(0, |e: &WalEntry| e.sequence);

        Ok((
            Self {
                path: path.to_path_buf(),
                writer: Mutex::new(Writer {
                    file,
                    len: valid_len,
                    sequence,
                    broken: false,
                }),
                sync_on_write,
            },
            entries,
        ))
    }

    fn recover(path: &Path, file: &File) -> IoResult<(Vec<WalEntry>, u64)> {
        let file_len = file.metadata()?.len();
        let mut iter = WalIterator::new(path)?;
        let mut entries = Vec::new();
        for entry in iter.by_ref() {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let after = entries.last().map_or(0, |e: &WalEntry| e.sequence);
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!("corrupted journal entry after sequence {after}: {e}"),
                    ));
                }
            }
        }
        let valid_len = iter.valid_len;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                offset = valid_len,
                dropped = file_len - valid_len,
                "dropping torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((entries, valid_len))
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, Writer>> {
        self.writer
            .lock()
            .map_err(|_| IoError::other("journal writer lock poisoned"))
    }

    /// Appends an entry, returning its sequence number.
    ///
    /// On failure the file is cut back to its previous length, so a failed
    /// append leaves no partial entry behind. If that cut fails too, the log
    /// refuses every later append.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.lock()?;
        if writer.broken {
            return Err(IoError::other(format!(
                "journal {} is unusable after a failed rollback",
                self.path.display()
            )));
        }
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let written = writer.file.write_all(&encoded).and_then(|()| {
            if self.sync_on_write {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            let len = writer.len;
            if let Err(rollback) = writer.file.set_len(len) {
                writer.broken = true;
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "journal rollback failed, refusing further appends"
                );
                return Err(IoError::new(
                    e.kind(),
                    format!("{e}; rollback to {len} bytes also failed: {rollback}"),
                ));
            }
            return Err(e);
        }

        writer.len += encoded.len() as u64;
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Sequence number of the last entry, `0` for an empty log.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over the entries of a log file.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    /// End offset of the last entry decoded successfully.
    valid_len: u64,
    failed: bool,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self {
            reader,
            file_size,
            valid_len: codec::HEADER_LEN,
            failed: false,
        })
    }

    fn at_end(&mut self) -> bool {
        self.reader
            .stream_position()
            .is_ok_and(|pos| pos >= self.file_size)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.valid_len >= self.file_size {
            return None;
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    self.valid_len = pos;
                    Some(Ok(entry))
                }
                Err(e) => {
                    self.failed = true;
                    Some(Err(e))
                }
            },
            // A torn final entry: stop quietly, the caller truncates.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            // A bad checksum on the final entry is a torn write as well.
            Err(_) if self.at_end() => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
