//! Snapshot flushing for in-memory stores
//!
//! The live database is written to `<target>.tmp` with `VACUUM INTO` and then
//! renamed over the target, so a crash mid-flush leaves the previous snapshot
//! intact. Only one flush runs at a time; a second caller gets
//! [`FlushOutcome::InFlight`] instead of queueing.

use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::Result;

/// What a flush request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Snapshot written
    Flushed { path: PathBuf, elapsed: Duration },
    /// Last flush was too recent and the request was not forced
    Throttled { remaining: Duration },
    /// Another flush holds the snapshot lock
    InFlight,
    /// Store is disk-backed; every commit is already durable
    NotRequired,
}

pub(crate) struct Snapshotter {
    target: PathBuf,
    min_interval: Duration,
    last_flush: Mutex<Option<Instant>>,
}

impl Snapshotter {
    pub(crate) fn new(target: PathBuf, min_interval: Duration) -> Self {
        Self {
            target,
            min_interval,
            last_flush: Mutex::new(None),
        }
    }

    pub(crate) fn target(&self) -> &Path {
        &self.target
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.target.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    pub(crate) async fn flush(&self, pool: &SqlitePool, force: bool) -> Result<FlushOutcome> {
        let mut last_flush = match self.last_flush.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(snapshot = %self.target.display(), "Flush already in progress");
                return Ok(FlushOutcome::InFlight);
            }
        };

        if !force {
            if let Some(previous) = *last_flush {
                let since = previous.elapsed();
                if since < self.min_interval {
                    return Ok(FlushOutcome::Throttled {
                        remaining: self.min_interval - since,
                    });
                }
            }
        }

        let started = Instant::now();
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // VACUUM INTO refuses to overwrite an existing file
        let temp = self.temp_path();
        match tokio::fs::remove_file(&temp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        sqlx::query("VACUUM INTO ?")
            .bind(temp.to_string_lossy().into_owned())
            .execute(pool)
            .await?;
        tokio::fs::rename(&temp, &self.target).await?;

        *last_flush = Some(Instant::now());
        let elapsed = started.elapsed();
        tracing::info!(
            snapshot = %self.target.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            forced = force,
            "Database snapshot flushed"
        );

        Ok(FlushOutcome::Flushed {
            path: self.target.clone(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_unforced_flush_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("snap.db");
        let snapshotter = Snapshotter::new(target.clone(), Duration::from_secs(3600));
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&pool).await.unwrap();

        let first = snapshotter.flush(&pool, false).await.unwrap();
        assert!(matches!(first, FlushOutcome::Flushed { .. }));
        assert!(target.exists());
        assert!(!snapshotter.temp_path().exists());

        let second = snapshotter.flush(&pool, false).await.unwrap();
        assert!(matches!(second, FlushOutcome::Throttled { .. }));

        let forced = snapshotter.flush(&pool, true).await.unwrap();
        assert!(matches!(forced, FlushOutcome::Flushed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_flush_reports_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snap.db"), Duration::ZERO);
        let pool = memory_pool().await;

        let _held = snapshotter.last_flush.lock().await;
        let outcome = snapshotter.flush(&pool, true).await.unwrap();
        assert_eq!(outcome, FlushOutcome::InFlight);
    }
}
