//! In-memory datom log.
//!
//! The log is append-only. A snapshot is nothing more than a basis `t`: it
//! sees the datoms of transactions `1..=t` and ignores everything appended
//! later, so readers never observe a partially applied transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datom::Datom;
use crate::ident::{Entid, USER_PARTITION_START};
use crate::schema::Schema;
use crate::storage::traits::StorageError;
use crate::value::Value;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// A committed transaction as written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Basis `t` after this transaction.
    pub t: u64,
    pub tx_id: Entid,
    pub instant: DateTime<Utc>,
    /// Resolved datoms, the `:db/txInstant` datom first.
    pub datoms: Vec<Datom>,
    /// First unallocated user entid after this transaction.
    pub next_entid: u64,
    /// Hex blake3 digest chaining this transaction to its predecessor.
    pub digest: String,
}

impl TxRecord {
    /// Computes the chain digest of a transaction.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the datoms cannot be encoded.
    pub fn chain_digest(prev: Option<&str>, t: u64, datoms: &[Datom]) -> Result<String, StorageError> {
        let encoded =
            serde_json::to_vec(datoms).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(prev.unwrap_or_default().as_bytes());
        hasher.update(&t.to_le_bytes());
        hasher.update(&encoded);
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Returns true if `digest` matches the datoms and predecessor.
    #[must_use]
    pub fn verify(&self, prev: Option<&str>) -> bool {
        Self::chain_digest(prev, self.t, &self.datoms).is_ok_and(|d| d == self.digest)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TxMeta {
    pub t: u64,
    pub tx_id: Entid,
    pub instant: DateTime<Utc>,
    pub digest: String,
    pub next_entid: u64,
    /// Datom index range `[start, end)` of this transaction.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
pub(crate) struct LogState {
    datoms: Vec<Datom>,
    eavt: HashMap<Entid, Vec<usize>>,
    /// Unique attributes only.
    avet: HashMap<(Entid, Value), Vec<usize>>,
    txs: Vec<TxMeta>,
}

impl LogState {
    pub fn basis_t(&self) -> u64 {
        self.txs.len() as u64
    }

    pub fn tx_meta(&self, t: u64) -> Option<&TxMeta> {
        let idx = usize::try_from(t.checked_sub(1)?).ok()?;
        self.txs.get(idx)
    }

    fn datom_limit(&self, basis_t: u64) -> usize {
        self.tx_meta(basis_t).map_or(0, |m| m.end)
    }

    /// First unallocated user entid as of `basis_t`.
    pub fn next_entid(&self, basis_t: u64) -> u64 {
        self.tx_meta(basis_t)
            .map_or(USER_PARTITION_START, |m| m.next_entid)
    }

    /// Returns true if `e` had been allocated as of `basis_t`.
    pub fn entity_exists(&self, e: Entid, basis_t: u64) -> bool {
        if e.is_user() {
            return e.get() < self.next_entid(basis_t);
        }
        e.tx_t().is_some_and(|t| t <= basis_t)
    }

    /// Datoms about `e` visible at `basis_t`, in log order.
    pub fn entity_datoms(&self, e: Entid, basis_t: u64) -> impl Iterator<Item = &Datom> {
        let limit = self.datom_limit(basis_t);
        self.eavt
            .get(&e)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .take_while(move |&&idx| idx < limit)
            .map(|&idx| &self.datoms[idx])
    }

    /// Current values of `(e, a)` at `basis_t`, in assertion order.
    pub fn current_values(&self, e: Entid, a: Entid, basis_t: u64) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::new();
        for d in self.entity_datoms(e, basis_t).filter(|d| d.a == a) {
            if d.added {
                if !values.contains(&d.v) {
                    values.push(d.v.clone());
                }
            } else {
                values.retain(|v| v != &d.v);
            }
        }
        values
    }

    /// Every current attribute of `e` at `basis_t`.
    pub fn current_attributes(&self, e: Entid, basis_t: u64) -> BTreeMap<Entid, Vec<Value>> {
        let mut attrs: BTreeMap<Entid, Vec<Value>> = BTreeMap::new();
        for d in self.entity_datoms(e, basis_t) {
            let values = attrs.entry(d.a).or_default();
            if d.added {
                if !values.contains(&d.v) {
                    values.push(d.v.clone());
                }
            } else {
                values.retain(|v| v != &d.v);
            }
        }
        attrs.retain(|_, v| !v.is_empty());
        attrs
    }

    /// Entity currently holding `v` for unique attribute `a` at `basis_t`.
    pub fn owner_of(&self, a: Entid, v: &Value, basis_t: u64) -> Option<Entid> {
        let limit = self.datom_limit(basis_t);
        let mut holders: Vec<Entid> = Vec::new();
        for &idx in self.avet.get(&(a, v.clone()))? {
            if idx >= limit {
                break;
            }
            let d = &self.datoms[idx];
            if d.added {
                if !holders.contains(&d.e) {
                    holders.push(d.e);
                }
            } else {
                holders.retain(|e| *e != d.e);
            }
        }
        holders.first().copied()
    }

    /// Transactions committed after `basis_t`, with their datoms.
    pub fn since(&self, basis_t: u64) -> impl Iterator<Item = (&TxMeta, &[Datom])> {
        let skip = usize::try_from(basis_t).unwrap_or(usize::MAX);
        self.txs
            .iter()
            .skip(skip)
            .map(|m| (m, &self.datoms[m.start..m.end]))
    }

    /// Appends a committed transaction.
    ///
    /// # Errors
    ///
    /// Rejects records that do not directly follow the current basis.
    pub fn apply(&mut self, schema: &Schema, record: TxRecord) -> Result<(), StorageError> {
        let expected = self.basis_t() + 1;
        if record.t != expected {
            return Err(StorageError::CorruptedLog(format!(
                "transaction t={} does not follow basis t={}",
                record.t,
                self.basis_t()
            )));
        }

        let start = self.datoms.len();
        for datom in record.datoms {
            let idx = self.datoms.len();
            self.eavt.entry(datom.e).or_default().push(idx);
            if schema.attribute_by_id(datom.a).is_some_and(|attr| attr.is_unique()) {
                self.avet.entry((datom.a, datom.v.clone())).or_default().push(idx);
            }
            self.datoms.push(datom);
        }

        self.txs.push(TxMeta {
            t: record.t,
            tx_id: record.tx_id,
            instant: record.instant,
            digest: record.digest,
            next_entid: record.next_entid,
            start,
            end: self.datoms.len(),
        });
        Ok(())
    }
}

/// The shared, append-only datom log.
///
/// Only the transactor appends; every other access is a read pinned to a
/// basis `t`.
#[derive(Debug)]
pub struct Log {
    id: Uuid,
    schema: Arc<Schema>,
    state: RwLock<LogState>,
}

impl Log {
    /// Creates an empty log.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema,
            state: RwLock::new(LogState::default()),
        }
    }

    /// Identity of this log, distinct for every store opened in the process.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Current basis `t`.
    ///
    /// # Errors
    ///
    /// Fails only if the lock was poisoned.
    pub fn basis_t(&self) -> Result<u64, StorageError> {
        Ok(self.read()?.basis_t())
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, LogState>, StorageError> {
        self.state.read().map_err(|_| lock_err("log.read"))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, LogState>, StorageError> {
        self.state.write().map_err(|_| lock_err("log.write"))
    }

    /// Replays previously journaled transactions, verifying the digest chain.
    ///
    /// # Errors
    ///
    /// Fails on a broken chain or a gap in `t`.
    pub fn replay(&self, records: Vec<TxRecord>) -> Result<(), StorageError> {
        let mut state = self.write()?;
        for record in records {
            let prev = state.tx_meta(state.basis_t()).map(|m| m.digest.clone());
            if !record.verify(prev.as_deref()) {
                return Err(StorageError::CorruptedLog(format!(
                    "digest mismatch at t={}",
                    record.t
                )));
            }
            state.apply(&self.schema, record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Unique, TX_INSTANT};
    use crate::value::ValueType;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .attribute(Attribute::new(":person/email", ValueType::String).unique(Unique::Identity))
                .attribute(Attribute::new(":person/tag", ValueType::Keyword).many())
                .build()
                .unwrap(),
        )
    }

    fn record(state: &LogState, datoms: Vec<Datom>, next_entid: u64) -> TxRecord {
        let t = state.basis_t() + 1;
        let prev = state.tx_meta(state.basis_t()).map(|m| m.digest.clone());
        let tx_id = Entid::tx(t);
        let mut all = vec![Datom::assertion(tx_id, TX_INSTANT, Value::Instant(Utc::now()), tx_id)];
        all.extend(datoms);
        let digest = TxRecord::chain_digest(prev.as_deref(), t, &all).unwrap();
        TxRecord {
            t,
            tx_id,
            instant: Utc::now(),
            datoms: all,
            next_entid,
            digest,
        }
    }

    #[test]
    fn test_snapshot_isolation_by_basis() {
        let schema = schema();
        let email = schema.entid(":person/email").unwrap();
        let mut state = LogState::default();
        let e = Entid::new(USER_PARTITION_START);

        let r1 = record(&state, vec![Datom::assertion(e, email, "a@x.com".into(), Entid::tx(1))], e.get() + 1);
        state.apply(&schema, r1).unwrap();
        let r2 = record(
            &state,
            vec![
                Datom::retraction(e, email, "a@x.com".into(), Entid::tx(2)),
                Datom::assertion(e, email, "b@x.com".into(), Entid::tx(2)),
            ],
            e.get() + 1,
        );
        state.apply(&schema, r2).unwrap();

        assert_eq!(state.current_values(e, email, 0), Vec::<Value>::new());
        assert_eq!(state.current_values(e, email, 1), vec![Value::from("a@x.com")]);
        assert_eq!(state.current_values(e, email, 2), vec![Value::from("b@x.com")]);
        assert_eq!(state.owner_of(email, &"a@x.com".into(), 1), Some(e));
        assert_eq!(state.owner_of(email, &"a@x.com".into(), 2), None);
        assert!(!state.entity_exists(e, 0));
        assert!(state.entity_exists(e, 1));
    }

    #[test]
    fn test_cardinality_many_values() {
        let schema = schema();
        let tag = schema.entid(":person/tag").unwrap();
        let mut state = LogState::default();
        let e = Entid::new(USER_PARTITION_START);
        let r = record(
            &state,
            vec![
                Datom::assertion(e, tag, Value::keyword(":t/a"), Entid::tx(1)),
                Datom::assertion(e, tag, Value::keyword(":t/b"), Entid::tx(1)),
            ],
            e.get() + 1,
        );
        state.apply(&schema, r).unwrap();
        assert_eq!(state.current_values(e, tag, 1).len(), 2);
        assert_eq!(state.current_attributes(e, 1).len(), 1);
    }

    #[test]
    fn test_apply_rejects_gap() {
        let schema = schema();
        let mut state = LogState::default();
        let mut r = record(&state, Vec::new(), USER_PARTITION_START);
        r.t = 5;
        assert!(matches!(state.apply(&schema, r), Err(StorageError::CorruptedLog(_))));
    }

    #[test]
    fn test_replay_verifies_chain() {
        let schema = schema();
        let log = Log::new(Arc::clone(&schema));
        let scratch = LogState::default();
        let mut r = record(&scratch, Vec::new(), USER_PARTITION_START);
        r.digest = "00".repeat(32);
        assert!(matches!(log.replay(vec![r]), Err(StorageError::CorruptedLog(_))));
        assert_eq!(log.basis_t().unwrap(), 0);
    }

    #[test]
    fn test_since_lists_later_transactions() {
        let schema = schema();
        let mut state = LogState::default();
        for _ in 0..3 {
            let r = record(&state, Vec::new(), USER_PARTITION_START);
            state.apply(&schema, r).unwrap();
        }
        let ts: Vec<u64> = state.since(1).map(|(m, _)| m.t).collect();
        assert_eq!(ts, vec![2, 3]);
    }
}
