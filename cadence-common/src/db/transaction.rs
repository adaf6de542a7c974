//! Monitored transactions
//!
//! Wraps a pooled sqlx transaction and logs how long the connection was held,
//! so pool saturation can be traced back to its caller. Dropping an
//! uncommitted transaction rolls it back.

use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use crate::{Error, Result};

/// Held for longer than this, a transaction is reported at WARN
const LONG_HOLD_MS: u128 = 2000;

pub struct MonitoredTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl MonitoredTransaction {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, caller: &'static str) -> Self {
        Self {
            tx: Some(tx),
            caller,
            acquired_at: Instant::now(),
        }
    }

    fn take(&mut self) -> Result<Transaction<'static, Sqlite>> {
        self.tx
            .take()
            .ok_or_else(|| Error::Internal(format!("Transaction already consumed ({})", self.caller)))
    }

    /// Commit and log release timing
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.commit().await?;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms as u64,
                "Long transaction, connection held for extended period"
            );
        } else {
            tracing::debug!(
                caller = self.caller,
                held_ms = held_ms as u64,
                "Connection released (commit)"
            );
        }
        Ok(())
    }

    /// Roll back and log release timing
    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.rollback().await?;

        tracing::debug!(
            caller = self.caller,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Connection released (rollback)"
        );
        Ok(())
    }

    pub fn caller(&self) -> &'static str {
        self.caller
    }
}

impl Deref for MonitoredTransaction {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        match &self.tx {
            Some(tx) => &**tx,
            None => unreachable!("transaction used after commit or rollback"),
        }
    }
}

impl DerefMut for MonitoredTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.tx {
            Some(tx) => &mut **tx,
            None => unreachable!("transaction used after commit or rollback"),
        }
    }
}

impl Drop for MonitoredTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx rolls the transaction back when it is dropped
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Connection released (drop, rolled back)"
            );
        }
    }
}
