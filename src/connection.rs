//! Connections: the entry point for reads and writes.

use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::db::Db;
use crate::error::DbResult;
use crate::report::TxReport;
use crate::schema::Schema;
use crate::storage::{Log, MemoryJournal, TxJournal};
use crate::transactor::runtime::{TransactorRuntime, TxHandle};
use crate::transactor::Transactor;
use crate::tx::Transaction;

/// A handle to one store.
///
/// Reads go through snapshots from [`db`](Self::db); writes go through the
/// store's single transactor thread, which is shut down when the connection
/// is dropped.
///
/// # Examples
///
/// ```
/// use tessera::{Attribute, Connection, Schema, Transaction, Unique, Value, ValueType};
///
/// let schema = Schema::builder()
///     .attribute(Attribute::new(":person/email", ValueType::String).unique(Unique::Identity))
///     .attribute(Attribute::new(":person/name", ValueType::String))
///     .build()?;
/// let conn = Connection::new(schema)?;
///
/// let mut tx = Transaction::new();
/// let alice = tx.tempid("alice");
/// tx.add(&alice, ":person/email", "a@x.com")
///   .add(&alice, ":person/name", "A");
/// let report = conn.transact(tx)?;
///
/// let id = report.resolve_tempid(&alice)?;
/// assert_eq!(report.db_after.value(id, ":person/name")?, Some(Value::from("A")));
/// # Ok::<(), tessera::DbError>(())
/// ```
pub struct Connection {
    log: Arc<Log>,
    runtime: TransactorRuntime,
    config: StoreConfig,
    durable: bool,
}

impl Connection {
    /// Opens an empty in-memory store with default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the transactor thread cannot be started.
    pub fn new(schema: Schema) -> DbResult<Self> {
        Self::with_config(schema, StoreConfig::default())
    }

    /// Opens an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration.
    pub fn with_config(schema: Schema, config: StoreConfig) -> DbResult<Self> {
        Self::with_journal(schema, config, Arc::new(MemoryJournal))
    }

    /// Opens an empty store that reports commits to `journal`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration.
    pub fn with_journal(
        schema: Schema,
        config: StoreConfig,
        journal: Arc<dyn TxJournal>,
    ) -> DbResult<Self> {
        let log = Arc::new(Log::new(Arc::new(schema)));
        Self::start(log, config, journal)
    }

    /// Opens (or creates) a durable store in directory `dir`, replaying its
    /// journal.
    ///
    /// # Errors
    ///
    /// - `Storage(Locked)` if the store is already open
    /// - `Schema(Incompatible)` if `schema` does not extend the stored one
    /// - `Storage(CorruptedLog)` if the journal's digest chain is broken
    #[cfg(feature = "persistent")]
    pub fn open(
        dir: impl AsRef<std::path::Path>,
        schema: Schema,
        config: StoreConfig,
    ) -> DbResult<Self> {
        use crate::storage::PersistentJournal;

        let config = config.validate()?;
        let (journal, records) = PersistentJournal::open(dir.as_ref(), &schema, &config.persistent)?;
        let log = Arc::new(Log::new(Arc::new(schema)));
        log.replay(records)?;
        info!(
            dir = %dir.as_ref().display(),
            basis_t = log.basis_t()?,
            "store recovered"
        );
        Self::start(log, config, Arc::new(journal))
    }

    fn start(log: Arc<Log>, config: StoreConfig, journal: Arc<dyn TxJournal>) -> DbResult<Self> {
        let config = config.validate()?;
        let durable = journal.is_durable();
        let transactor = Transactor::new(Arc::clone(&log), journal, config.conflict_policy);
        let runtime = TransactorRuntime::start(transactor, config.queue_capacity)?;
        info!(
            policy = ?config.conflict_policy,
            queue_capacity = config.queue_capacity,
            durable,
            "transactor started"
        );
        Ok(Self {
            log,
            runtime,
            config,
            durable,
        })
    }

    /// The current snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn db(&self) -> DbResult<Db> {
        Ok(Db::new(Arc::clone(&self.log), self.log.basis_t()?))
    }

    /// Submits `tx` and waits for it to commit.
    ///
    /// # Errors
    ///
    /// - `Rejected` if the batch is invalid
    /// - `Conflict` if it lost a compare-and-swap or a write conflict
    /// - `QueueFull` if the transactor is saturated
    /// - `Storage` if the journal append failed
    pub fn transact(&self, tx: Transaction) -> DbResult<TxReport> {
        self.transact_async(tx)?.join()
    }

    /// Submits `tx` without waiting. The returned handle yields the same
    /// report [`transact`](Self::transact) would have.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Disconnected` if the batch could not be enqueued.
    /// Every other failure is reported through the handle.
    pub fn transact_async(&self, tx: Transaction) -> DbResult<TxHandle> {
        self.runtime.submit(tx)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.log.schema()
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if commits survive a restart.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::schema::Attribute;
    use crate::value::ValueType;

    fn schema() -> Schema {
        Schema::builder()
            .attribute(Attribute::new(":person/name", ValueType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Connection::with_config(schema(), StoreConfig::default().with_queue_capacity(0))
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[test]
    fn test_db_tracks_commits() {
        let conn = Connection::new(schema()).unwrap();
        assert_eq!(conn.db().unwrap().basis_t(), 0);
        assert!(!conn.is_durable());

        let mut tx = Transaction::new();
        let e = tx.tempid("e");
        tx.add(&e, ":person/name", "A");
        let report = conn.transact(tx).unwrap();
        assert_eq!(conn.db().unwrap(), report.db_after);
    }
}
