//! Store configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Granularity at which concurrent writes conflict.
///
/// Only transactions that carry a basis (`Transaction::with_basis`) are
/// checked; a transaction without one is applied against whatever the
/// current state is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Never conflict. Later writes simply win.
    #[default]
    Serial,
    /// Conflict if any entity written by the transaction was written by a
    /// transaction committed after its basis.
    Entity,
    /// Conflict only on the same entity and attribute.
    Attribute,
}

/// Configuration of the persistent journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// Whether to fsync after every commit (slower but safer).
    #[serde(default = "default_sync_on_write")]
    pub sync_on_write: bool,
}

const fn default_sync_on_write() -> bool {
    true
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: default_sync_on_write(),
        }
    }
}

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Maximum number of transactions waiting for the transactor.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub persistent: PersistentConfig,
}

const fn default_queue_capacity() -> usize {
    1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            queue_capacity: default_queue_capacity(),
            persistent: PersistentConfig::default(),
        }
    }
}

impl StoreConfig {
    const MAX_QUEUE_CAPACITY: usize = 1 << 20;

    /// Returns the config with the given conflict policy.
    #[must_use]
    pub const fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Returns the config with the given queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Checks bounds.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Config` if the queue capacity is zero or absurdly large.
    pub fn validate(self) -> DbResult<Self> {
        if self.queue_capacity == 0 {
            return Err(DbError::config("queue_capacity must be at least 1"));
        }
        if self.queue_capacity > Self::MAX_QUEUE_CAPACITY {
            return Err(DbError::config(format!(
                "queue_capacity must be at most {} (got {})",
                Self::MAX_QUEUE_CAPACITY,
                self.queue_capacity
            )));
        }
        Ok(self)
    }

    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Config` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Config` on malformed JSON or invalid values.
    pub fn from_json(text: &str) -> DbResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| DbError::config(format!("invalid config: {e}")))?;
        config.validate()
    }
}
