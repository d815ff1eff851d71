//! Datom log and journals.
//!
//! The in-memory [`Log`] serves every read. A [`TxJournal`] receives each
//! committed transaction before it is published to the log.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{Log, TxRecord};
pub(crate) use memory::LogState;
pub use traits::{MemoryJournal, StorageError, TxJournal};

#[cfg(feature = "persistent")]
pub use persistent::{PersistentJournal, WAL_FILE};
