//! Transaction helpers
//!
//! Multi-row writes that must be all-or-nothing (an image plus the locations
//! that link it to existing objects, or an image and its locations on delete)
//! go through these.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;

/// Open transaction that must end in `commit` or `rollback`.
///
/// Dropping it unfinished returns the connection to the pool, which rolls
/// the transaction back; that path is logged.
pub struct TransactionGuard {
    tx: Option<Transaction<'static, Postgres>>,
}

impl TransactionGuard {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await.context("Failed to begin transaction")?;
        Ok(Self { tx: Some(tx) })
    }

    pub async fn commit(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.context("Failed to commit transaction"),
            None => Ok(()),
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.context("Failed to roll back transaction"),
            None => Ok(()),
        }
    }
}

impl Deref for TransactionGuard {
    type Target = Transaction<'static, Postgres>;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        // commit and rollback consume the guard, so the slot is always full here
        self.tx.as_ref().expect("transaction already finished")
    }
}

impl DerefMut for TransactionGuard {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx.as_mut().expect("transaction already finished")
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!("Transaction dropped unfinished, rolling back");
        }
    }
}

type TxFuture<'a, R, E> = Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'a>>;

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
pub async fn with_transaction<F, R, E>(pool: &PgPool, f: F) -> Result<R>
where
    F: for<'a> FnOnce(&'a mut Transaction<'static, Postgres>) -> TxFuture<'a, R, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await.context("Failed to commit transaction")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e.into())
        }
    }
}
