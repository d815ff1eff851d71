//! The single writer.
//!
//! Every transaction is committed by one [`Transactor`], one at a time, so
//! commits are totally ordered and each sees the effects of all earlier ones.
//! [`runtime`] puts it behind a bounded queue on a dedicated thread.

pub mod runtime;
mod write_path;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ConflictPolicy;
use crate::db::Db;
use crate::error::DbResult;
use crate::ident::Entid;
use crate::report::{TempIds, TxReport};
use crate::storage::{Log, TxJournal, TxRecord};
use crate::tx::{validate, Transaction};

/// Commits transactions against a [`Log`], journaling each one first.
pub(crate) struct Transactor {
    log: Arc<Log>,
    journal: Arc<dyn TxJournal>,
    policy: ConflictPolicy,
}

impl Transactor {
    pub(crate) fn new(log: Arc<Log>, journal: Arc<dyn TxJournal>, policy: ConflictPolicy) -> Self {
        Self {
            log,
            journal,
            policy,
        }
    }

    /// Commits `tx` atomically: either every statement applies and a report
    /// is returned, or nothing is written.
    pub(crate) fn commit(&self, tx: &Transaction) -> DbResult<TxReport> {
        let schema = Arc::clone(self.log.schema());
        let checked = validate(tx, &schema).map_err(|rejection| {
            warn!(%rejection, statements = tx.len(), "transaction rejected");
            rejection
        })?;

        let mut state = self.log.write()?;
        let before_t = state.basis_t();
        let t = before_t + 1;
        let tx_id = Entid::tx(t);
        let prev = state.tx_meta(before_t);
        // txInstant never goes backwards, even if the wall clock does.
        let instant = prev.map_or_else(Utc::now, |m| m.instant.max(Utc::now()));

        let prepared = write_path::prepare(
            &checked,
            tx.basis_t(),
            &state,
            &schema,
            self.policy,
            tx_id,
            instant,
        )
        .map_err(|e| {
            warn!(error = %e, t, "transaction aborted");
            e
        })?;

        let digest = TxRecord::chain_digest(
            state.tx_meta(before_t).map(|m| m.digest.as_str()),
            t,
            &prepared.datoms,
        )?;
        let record = TxRecord {
            t,
            tx_id,
            instant,
            datoms: prepared.datoms,
            next_entid: prepared.next_entid,
            digest,
        };

        self.journal.append(&record)?;
        let tx_data = record.datoms.clone();
        state.apply(&schema, record)?;
        drop(state);

        debug!(t, tempids = prepared.tempids.len(), "tempids resolved");
        info!(t, %tx_id, datoms = tx_data.len(), "transaction committed");

        Ok(TxReport {
            db_before: Db::new(Arc::clone(&self.log), before_t),
            db_after: Db::new(Arc::clone(&self.log), t),
            tx_data,
            tempids: TempIds::new(self.log.id(), t, prepared.tempids),
            tx_id,
            tx_instant: instant,
        })
    }
}
