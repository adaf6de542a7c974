//! Pooled SQLite store
//!
//! Every database access goes through [`Store`]: a bounded connection pool
//! with per-connection busy timeout, the shared [`RetryPolicy`], and (for
//! in-memory stores) snapshot flushing and restore.
//!
//! Closures handed to [`Store::read`] and [`Store::write`] receive a plain
//! `&mut SqliteConnection` and may be invoked more than once, so they must
//! own (or clone) whatever they capture.

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqliteConnection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::init::{self, SCHEMA_VERSION, TABLES};
use super::retry::{RetryDecision, RetryPolicy};
use super::snapshot::{FlushOutcome, Snapshotter};
use super::transaction::MonitoredTransaction;
use crate::{Error, Result};

/// Where the live database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// WAL-mode database file; commits are durable on their own
    Disk(PathBuf),
    /// Shared in-memory database, optionally restored from and flushed to
    /// a snapshot file
    InMemory { snapshot: Option<PathBuf> },
}

/// Pool and durability settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub location: StoreLocation,
    pub pool_min: u32,
    pub pool_max: u32,
    /// How long one acquire waits before counting as a pool timeout
    pub acquire_timeout: Duration,
    /// Per-connection SQLite busy handler timeout
    pub busy_timeout: Duration,
    /// Unforced flushes closer together than this are throttled
    pub flush_min_interval: Duration,
    pub retry: RetryPolicy,
}

impl StoreOptions {
    /// Small private in-memory store, used by tests and one-shot tools
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory { snapshot: None },
            pool_min: 1,
            pool_max: 4,
            acquire_timeout: Duration::from_secs(2),
            busy_timeout: Duration::from_millis(250),
            flush_min_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::Disk(path.into()),
            ..Self::in_memory()
        }
    }
}

struct StoreInner {
    pool: SqlitePool,
    retry: RetryPolicy,
    snapshot: Option<Snapshotter>,
    in_memory: bool,
}

/// Cheaply cloneable handle to the pooled database
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the pool, create the schema, and restore the snapshot if the
    /// store is in-memory and one exists.
    pub async fn open(options: StoreOptions) -> Result<Self> {
        if options.pool_max == 0 || options.pool_min > options.pool_max {
            return Err(Error::Config(format!(
                "Invalid pool bounds: min={} max={}",
                options.pool_min, options.pool_max
            )));
        }

        let (connect_options, in_memory, snapshot_path) = match &options.location {
            StoreLocation::Disk(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let connect = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal);
                (connect, false, None)
            }
            StoreLocation::InMemory { snapshot } => {
                // sqlx gives each ":memory:" options value its own
                // shared-cache database, visible to every pooled connection
                let connect = SqliteConnectOptions::from_str("sqlite::memory:")?;
                (connect, true, snapshot.clone())
            }
        };
        let connect_options = connect_options
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .min_connections(options.pool_min)
            .max_connections(options.pool_max)
            .acquire_timeout(options.acquire_timeout);
        if in_memory {
            // The database disappears with its last connection
            pool_options = pool_options
                .min_connections(options.pool_min.max(1))
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(connect_options).await?;

        {
            let mut conn = pool.acquire().await?;
            init::create_schema(&mut conn).await?;
            if let Some(path) = &snapshot_path {
                restore_snapshot(&mut conn, path).await?;
            }
        }

        tracing::info!(
            location = ?options.location,
            pool_min = options.pool_min,
            pool_max = options.pool_max,
            busy_timeout_ms = options.busy_timeout.as_millis() as u64,
            "Database store ready"
        );

        let snapshot =
            snapshot_path.map(|path| Snapshotter::new(path, options.flush_min_interval));

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                retry: options.retry,
                snapshot,
                in_memory,
            }),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn is_in_memory(&self) -> bool {
        self.inner.in_memory
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.inner.snapshot.as_ref().map(|s| s.target())
    }

    /// Acquire a pooled connection, retrying pool timeouts
    pub async fn acquire(&self, caller: &'static str) -> Result<PoolConnection<Sqlite>> {
        self.inner
            .retry
            .run(caller, || async { Ok(self.inner.pool.acquire().await?) })
            .await
    }

    /// Begin a monitored transaction, retrying pool timeouts
    pub async fn begin(&self, caller: &'static str) -> Result<MonitoredTransaction> {
        self.inner
            .retry
            .run(caller, || self.begin_once(caller))
            .await
    }

    async fn begin_once(&self, caller: &'static str) -> Result<MonitoredTransaction> {
        let tx = self.inner.pool.begin().await?;
        Ok(MonitoredTransaction::new(tx, caller))
    }

    /// Run `operation` under the store's retry policy
    pub async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.inner.retry.run(operation_name, operation).await
    }

    /// Run `f` inside one transaction, once. Commits on `Ok`, rolls back on
    /// `Err`.
    pub async fn with_transaction<F, T>(&self, caller: &'static str, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = self.begin_once(caller).await?;
        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        caller,
                        error = %rollback_err,
                        "Rollback failed after transaction error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Read on a pooled connection, retrying lock conflicts and pool
    /// timeouts
    pub async fn read<F, T>(&self, caller: &'static str, mut f: F) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.inner.pool.acquire().await {
                Ok(mut conn) => f(&mut *conn).await,
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => match self.inner.retry.on_error(caller, attempt, err) {
                    RetryDecision::Retry(delay) => tokio::time::sleep(delay).await,
                    RetryDecision::Fail(err) => return Err(err),
                },
            }
        }
    }

    /// Write in a transaction, retrying the whole transaction on lock
    /// conflicts and pool timeouts. Each attempt is all-or-nothing.
    pub async fn write<F, T>(&self, caller: &'static str, mut f: F) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.with_transaction(caller, &mut f).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(caller, attempt, "Write succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => match self.inner.retry.on_error(caller, attempt, err) {
                    RetryDecision::Retry(delay) => tokio::time::sleep(delay).await,
                    RetryDecision::Fail(err) => return Err(err),
                },
            }
        }
    }

    /// Persist the in-memory database to its snapshot file
    pub async fn flush(&self, force: bool) -> Result<FlushOutcome> {
        match &self.inner.snapshot {
            Some(snapshotter) => snapshotter.flush(&self.inner.pool, force).await,
            None => Ok(FlushOutcome::NotRequired),
        }
    }

    /// Close the pool. An in-memory store without a flushed snapshot loses
    /// its contents here.
    pub async fn close(&self) {
        self.inner.pool.close().await;
        tracing::debug!("Database store closed");
    }
}

/// Copy every table of the snapshot at `path` into the fresh main database
async fn restore_snapshot(conn: &mut SqliteConnection, path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        tracing::info!(snapshot = %path.display(), "No snapshot yet, starting empty");
        return Ok(());
    }

    sqlx::query("ATTACH DATABASE ? AS snapshot")
        .bind(path.to_string_lossy().into_owned())
        .execute(&mut *conn)
        .await?;

    let copied = copy_attached_snapshot(conn, path).await;

    if let Err(e) = sqlx::query("DETACH DATABASE snapshot").execute(&mut *conn).await {
        tracing::warn!(error = %e, "Failed to detach snapshot database");
    }
    copied
}

async fn copy_attached_snapshot(conn: &mut SqliteConnection, path: &Path) -> Result<()> {
    let version = init::read_schema_version(conn, "snapshot").await?;
    if version != SCHEMA_VERSION {
        tracing::warn!(
            snapshot = %path.display(),
            snapshot_version = version,
            expected_version = SCHEMA_VERSION,
            "Snapshot schema version mismatch, not restoring; starting with a fresh schema"
        );
        return Ok(());
    }

    sqlx::query("BEGIN").execute(&mut *conn).await?;
    let mut rows_total: u64 = 0;
    for table in TABLES {
        let sql = format!("INSERT INTO main.{table} SELECT * FROM snapshot.{table}");
        match sqlx::query(&sql).execute(&mut *conn).await {
            Ok(done) => rows_total += done.rows_affected(),
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(
                        snapshot = %path.display(),
                        table,
                        error = %rollback_err,
                        "Rollback failed after snapshot restore error"
                    );
                }
                return Err(e.into());
            }
        }
    }
    sqlx::query("COMMIT").execute(&mut *conn).await?;

    tracing::info!(
        snapshot = %path.display(),
        rows = rows_total,
        "Restored database from snapshot"
    );
    Ok(())
}
