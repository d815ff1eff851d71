//! Transaction results and tempid resolution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::datom::Datom;
use crate::db::Db;
use crate::error::{DbError, DbResult};
use crate::ident::{Entid, TempId};

/// Mapping from the temporary ids of one transaction to the permanent ids
/// they resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempIds {
    store: Uuid,
    basis_t: u64,
    map: BTreeMap<TempId, Entid>,
}

impl TempIds {
    pub(crate) fn new(store: Uuid, basis_t: u64, map: BTreeMap<TempId, Entid>) -> Self {
        Self {
            store,
            basis_t,
            map,
        }
    }

    /// Basis `t` of the snapshot the owning transaction produced.
    #[must_use]
    pub const fn basis_t(&self) -> u64 {
        self.basis_t
    }

    #[must_use]
    pub fn get(&self, tempid: &TempId) -> Option<Entid> {
        self.map.get(tempid).copied()
    }

    /// Looks a tempid up by the label it was declared with.
    #[must_use]
    pub fn get_by_label(&self, label: &str) -> Option<Entid> {
        self.map
            .iter()
            .find(|(t, _)| t.label() == label)
            .map(|(_, e)| *e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TempId, Entid)> {
        self.map.iter().map(|(t, e)| (t, *e))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Resolves a temporary id against the mapping produced with `after`.
///
/// Pure lookup; safe to call repeatedly and from any thread.
///
/// # Errors
///
/// - `SnapshotMismatch` if `tempids` was not produced by the transaction
///   whose after-snapshot is `after`
/// - `UnknownTempId` if `tempid` was not used by that transaction
pub fn resolve_tempid(after: &Db, tempids: &TempIds, tempid: &TempId) -> DbResult<Entid> {
    if after.store_id() != tempids.store || after.basis_t() != tempids.basis_t {
        return Err(DbError::SnapshotMismatch {
            mapping_t: tempids.basis_t,
            snapshot_t: after.basis_t(),
        });
    }
    tempids.get(tempid).ok_or_else(|| DbError::UnknownTempId {
        tempid: tempid.to_string(),
    })
}

/// Outcome of a committed transaction. Produced once, never modified.
#[derive(Debug, Clone)]
pub struct TxReport {
    /// Snapshot immediately before the transaction.
    pub db_before: Db,
    /// Snapshot immediately after the transaction.
    pub db_after: Db,
    /// Applied datoms with every tempid replaced by its permanent id.
    pub tx_data: Vec<Datom>,
    /// Temporary to permanent id mapping.
    pub tempids: TempIds,
    pub tx_id: Entid,
    pub tx_instant: DateTime<Utc>,
}

impl TxReport {
    /// Resolves a tempid of this transaction.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTempId` if the tempid was not used by this transaction.
    pub fn resolve_tempid(&self, tempid: &TempId) -> DbResult<Entid> {
        resolve_tempid(&self.db_after, &self.tempids, tempid)
    }
}
