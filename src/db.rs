//! Immutable snapshots.
//!
//! A [`Db`] is a view of the store as of one commit point. It shares the
//! append-only log with every other snapshot and the transactor, and pins a
//! basis `t`; transactions committed after `t` are invisible to it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::datom::Datom;
use crate::error::{DbError, DbResult};
use crate::ident::Entid;
use crate::schema::Schema;
use crate::storage::Log;
use crate::value::Value;

/// An immutable snapshot of the store.
#[derive(Clone)]
pub struct Db {
    log: Arc<Log>,
    basis_t: u64,
}

impl Db {
    pub(crate) fn new(log: Arc<Log>, basis_t: u64) -> Self {
        Self { log, basis_t }
    }

    /// The commit point this snapshot is pinned at. `0` is the empty store.
    #[must_use]
    pub const fn basis_t(&self) -> u64 {
        self.basis_t
    }

    /// Id of the transaction that produced this snapshot.
    #[must_use]
    pub const fn tx_id(&self) -> Option<Entid> {
        if self.basis_t == 0 {
            None
        } else {
            Some(Entid::tx(self.basis_t))
        }
    }

    /// Ids of every transaction visible in this snapshot, oldest first.
    pub fn tx_ids(&self) -> impl Iterator<Item = Entid> {
        (1..=self.basis_t).map(Entid::tx)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.log.schema()
    }

    /// Attribute id of an ident.
    #[must_use]
    pub fn entid(&self, ident: &str) -> Option<Entid> {
        self.schema().entid(ident)
    }

    fn attr(&self, ident: &str) -> DbResult<Entid> {
        self.entid(ident).ok_or_else(|| DbError::UnknownAttribute {
            ident: ident.to_string(),
        })
    }

    /// All current values of `attr` on `e`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` if `attr` is not in the schema.
    pub fn values(&self, e: Entid, attr: &str) -> DbResult<Vec<Value>> {
        let a = self.attr(attr)?;
        Ok(self.log.read()?.current_values(e, a, self.basis_t))
    }

    /// The current value of a cardinality-one attribute.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` if `attr` is not in the schema.
    pub fn value(&self, e: Entid, attr: &str) -> DbResult<Option<Value>> {
        Ok(self.values(e, attr)?.into_iter().next())
    }

    /// Every current attribute of `e`, keyed by ident.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn entity(&self, e: Entid) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let attrs = self.log.read()?.current_attributes(e, self.basis_t);
        let schema = self.schema();
        Ok(attrs
            .into_iter()
            .filter_map(|(a, v)| schema.ident(a).map(|ident| (ident.to_string(), v)))
            .collect())
    }

    /// Full history of `e` up to this snapshot, retractions included.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn datoms_for(&self, e: Entid) -> DbResult<Vec<Datom>> {
        Ok(self
            .log
            .read()?
            .entity_datoms(e, self.basis_t)
            .cloned()
            .collect())
    }

    /// Finds the entity holding `value` for a unique attribute.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` if `attr` is not in the schema.
    pub fn lookup(&self, attr: &str, value: &Value) -> DbResult<Option<Entid>> {
        let a = self.attr(attr)?;
        let state = self.log.read()?;
        if self.schema().attribute_by_id(a).is_some_and(|x| x.is_unique()) {
            return Ok(state.owner_of(a, value, self.basis_t));
        }
        Ok(None)
    }

    /// Returns true if `e` had been allocated at this snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn exists(&self, e: Entid) -> DbResult<bool> {
        Ok(self.log.read()?.entity_exists(e, self.basis_t))
    }

    /// Wall-clock time of the transaction that produced this snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn tx_instant(&self) -> DbResult<Option<DateTime<Utc>>> {
        Ok(self.log.read()?.tx_meta(self.basis_t).map(|m| m.instant))
    }

    /// Chain digest of the transaction that produced this snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the log lock was poisoned.
    pub fn digest(&self) -> DbResult<Option<String>> {
        Ok(self
            .log
            .read()?
            .tx_meta(self.basis_t)
            .map(|m| m.digest.clone()))
    }

    /// An older snapshot of the same store.
    ///
    /// # Errors
    ///
    /// Returns `FutureBasis` if `t` is after this snapshot.
    pub fn as_of(&self, t: u64) -> DbResult<Self> {
        if t > self.basis_t {
            return Err(DbError::FutureBasis {
                requested: t,
                basis_t: self.basis_t,
            });
        }
        Ok(Self::new(Arc::clone(&self.log), t))
    }

    pub(crate) fn store_id(&self) -> Uuid {
        self.log.id()
    }

    /// Returns true if both snapshots view the same store.
    #[must_use]
    pub fn same_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.log, &other.log)
    }
}

impl PartialEq for Db {
    fn eq(&self, other: &Self) -> bool {
        self.same_store(other) && self.basis_t == other.basis_t
    }
}

impl Eq for Db {}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db").field("basis_t", &self.basis_t).finish()
    }
}
