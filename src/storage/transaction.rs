//! Request-scoped transactions
//!
//! A [`Transaction`] holds the store's only connection from `BEGIN` until
//! it is committed or rolled back, so transactions never interleave.
//! Handles are cheap clones of one shared unit of work; whichever clone
//! finishes it does so exactly once. Dropping the last handle of an active
//! transaction rolls it back and releases the connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tokio::sync::OwnedMutexGuard;

use crate::{Error, Result};

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

enum Slot {
    Active(OwnedMutexGuard<Connection>),
    Finished(TxState),
}

struct Inner {
    id: u64,
    slot: Mutex<Slot>,
}

/// Handle to an open unit of work on the shared connection
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    /// Wait for the connection and issue `BEGIN IMMEDIATE`
    pub(crate) async fn begin(conn: Arc<tokio::sync::Mutex<Connection>>, id: u64) -> Result<Self> {
        let guard = conn.lock_owned().await;

        let guard = tokio::task::spawn_blocking(move || -> Result<OwnedMutexGuard<Connection>> {
            // A holder cancelled between BEGIN and handing out its handle
            // can leave the connection mid-transaction
            if !guard.is_autocommit() {
                tracing::warn!(tx = id, "Connection still inside a transaction, rolling back");
                guard.execute_batch("ROLLBACK")?;
            }
            guard.execute_batch("BEGIN IMMEDIATE")?;
            Ok(guard)
        })
        .await??;

        tracing::debug!(tx = id, "Transaction started");
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                slot: Mutex::new(Slot::Active(guard)),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> TxState {
        match &*self.inner.lock_slot() {
            Slot::Active(_) => TxState::Active,
            Slot::Finished(state) => *state,
        }
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// Fails with [`Error::TransactionClosed`] once the transaction has
    /// finished. A panic inside `f` resumes on the calling task.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        match tokio::task::spawn_blocking(move || inner.with_connection(f)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn commit(&self) -> Result<()> {
        self.finish(Outcome::Commit).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.finish(Outcome::Rollback).await
    }

    async fn finish(&self, outcome: Outcome) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.finish(outcome)).await?
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // A panic inside `run` poisons the lock; the slot itself stays valid
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        match &*self.lock_slot() {
            Slot::Active(conn) => f(conn),
            Slot::Finished(_) => Err(Error::TransactionClosed),
        }
    }

    fn finish(&self, outcome: Outcome) -> Result<()> {
        let mut slot = self.lock_slot();
        let conn = match std::mem::replace(&mut *slot, Slot::Finished(TxState::RolledBack)) {
            Slot::Active(conn) => conn,
            finished => {
                *slot = finished;
                return Err(Error::TransactionClosed);
            }
        };

        match outcome {
            Outcome::Commit => match conn.execute_batch("COMMIT") {
                Ok(()) => {
                    *slot = Slot::Finished(TxState::Committed);
                    tracing::debug!(tx = self.id, "Transaction committed");
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(tx = self.id, "Failed to commit transaction: {}", err);
                    rollback_quietly(&conn, self.id);
                    Err(err.into())
                }
            },
            Outcome::Rollback => {
                let result = conn.execute_batch("ROLLBACK");
                tracing::debug!(tx = self.id, "Transaction rolled back");
                result.map_err(Into::into)
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Slot::Active(conn) = std::mem::replace(slot, Slot::Finished(TxState::RolledBack)) else {
            return;
        };

        let id = self.id;
        tracing::warn!(tx = id, "Transaction abandoned while active, rolling back");
        // Keep the blocking ROLLBACK off async workers; the guard is released
        // once it has run
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || rollback_quietly(&conn, id));
            }
            Err(_) => rollback_quietly(&conn, id),
        }
    }
}

/// Roll back if a transaction is still open; failures are logged only
fn rollback_quietly(conn: &Connection, id: u64) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(err) = conn.execute_batch("ROLLBACK") {
        tracing::error!(tx = id, "Failed to rollback transaction: {}", err);
    }
}
