//! Transactor thread and submission queue.
//!
//! Submissions go through a bounded queue to one dedicated thread, which
//! commits them in arrival order. The caller gets a [`TxHandle`] back
//! immediately and collects the report from it whenever it wants.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::report::TxReport;
use crate::transactor::Transactor;
use crate::tx::Transaction;

enum Job {
    Transact {
        tx: Transaction,
        reply: Sender<DbResult<TxReport>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Owns the transactor thread. Dropping it drains the queue and joins the
/// thread.
pub(crate) struct TransactorRuntime {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    queue_capacity: usize,
}

impl TransactorRuntime {
    pub(crate) fn start(transactor: Transactor, queue_capacity: usize) -> DbResult<Self> {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let worker = thread::Builder::new()
            .name("tessera-transactor".to_string())
            .spawn(move || loop {
                match rx.recv() {
                    Ok(Job::Transact { tx, reply }) => {
                        let result = transactor.commit(&tx);
                        // The submitter may have dropped its handle.
                        let _ = reply.send(result);
                    }
                    Err(_) => break,

                    #[cfg(test)]
                    Ok(Job::Sleep { duration, reply }) => {
                        thread::sleep(duration);
                        let _ = reply.send(());
                    }
                }
            })
            .map_err(|e| DbError::internal(format!("failed to spawn transactor thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> DbResult<()> {
        let Some(tx) = &self.tx else {
            return Err(DbError::Disconnected);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DbError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(DbError::Disconnected),
        }
    }

    /// Enqueues `tx` without waiting for it to commit.
    pub(crate) fn submit(&self, tx: Transaction) -> DbResult<TxHandle> {
        let (reply, rx) = bounded::<DbResult<TxReport>>(1);
        debug!(statements = tx.len(), "transaction submitted");
        self.try_submit(Job::Transact { tx, reply })?;
        Ok(TxHandle { rx })
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> DbResult<Receiver<()>> {
        let (reply, rx) = bounded::<()>(1);
        self.try_submit(Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for TransactorRuntime {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain queued jobs, then exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Pending result of an asynchronously submitted transaction.
///
/// Dropping the handle does not cancel the transaction; it still commits.
#[derive(Debug)]
pub struct TxHandle {
    rx: Receiver<DbResult<TxReport>>,
}

impl TxHandle {
    /// Blocks until the transaction commits or fails.
    ///
    /// # Errors
    ///
    /// Returns the transaction's own error, or `Disconnected` if the
    /// transactor went away before replying.
    pub fn join(self) -> DbResult<TxReport> {
        self.rx.recv().map_err(|_| DbError::Disconnected)?
    }

    /// Like [`join`](Self::join), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no result arrived in time. The transaction may
    /// still commit afterwards.
    pub fn join_timeout(self, timeout: Duration) -> DbResult<TxReport> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DbError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => DbError::Disconnected,
        })?
    }

    /// Returns the result if it is already available.
    ///
    /// `None` means the transaction has not finished yet. A result can be
    /// taken only once.
    pub fn try_result(&self) -> Option<DbResult<TxReport>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(DbError::Disconnected)),
        }
    }

    /// Awaits the result without blocking the async executor.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join), plus `Internal` if the blocking task
    /// panicked.
    #[cfg(feature = "async")]
    pub async fn wait(self) -> DbResult<TxReport> {
        tokio::task::spawn_blocking(move || self.join())
            .await
            .map_err(|e| DbError::internal(format!("wait task failed: {e}")))?
    }
}
