//! Job state for long-running background work
//!
//! One [`JobTracker`] per job kind. Starting a job takes a non-blocking lock
//! on the tracker's slot; a second start while the slot is held fails fast
//! with [`IngestError::JobAlreadyRunning`]. The worker owns the returned
//! [`JobHandle`] and is the only writer of the status; every other caller
//! reads copies through [`JobTracker::snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scan,
    Analysis,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Scan => f.write_str("scan"),
            JobKind::Analysis => f.write_str("analysis"),
        }
    }
}

/// `Idle → Running → (Stopping →) Completed | Cancelled | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// No job has run since startup
    Idle,
    Running,
    /// Cancellation requested; the current file is still finishing
    Stopping,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Stopping)
    }
}

/// Last error and where in the job it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub processed: usize,
    pub total: usize,
}

/// Read-only copy of a job's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub kind: JobKind,
    pub job_id: Option<Uuid>,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub processed: usize,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub current_file: Option<String>,
    pub last_error: Option<JobError>,
}

impl JobStatus {
    fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            job_id: None,
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            total: 0,
            processed: 0,
            added: 0,
            updated: 0,
            skipped: 0,
            analyzed: 0,
            failed: 0,
            current_file: None,
            last_error: None,
        }
    }

    fn started(kind: JobKind, job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            state: JobState::Running,
            started_at: Some(Utc::now()),
            ..Self::idle(kind)
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_active()
    }

    /// 0.0 - 100.0; 0 until the total is known
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Per-file result reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Added,
    Updated,
    Skipped,
    Analyzed,
}

struct TrackerInner {
    kind: JobKind,
    slot: Arc<tokio::sync::Mutex<()>>,
    status: RwLock<JobStatus>,
    token: Mutex<CancellationToken>,
}

/// Status and mutual-exclusion slot for one job kind
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    pub fn new(kind: JobKind) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                kind,
                slot: Arc::new(tokio::sync::Mutex::new(())),
                status: RwLock::new(JobStatus::idle(kind)),
                token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    fn read_status(&self) -> RwLockReadGuard<'_, JobStatus> {
        self.inner
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_status(&self) -> RwLockWriteGuard<'_, JobStatus> {
        self.inner
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot and reset the status for a new job. Never waits.
    pub fn try_start(&self) -> IngestResult<JobHandle> {
        let guard = self
            .inner
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| IngestError::JobAlreadyRunning(self.inner.kind))?;

        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();
        *self
            .inner
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        *self.write_status() = JobStatus::started(self.inner.kind, job_id);

        tracing::info!(kind = %self.inner.kind, job_id = %job_id, "Job started");

        Ok(JobHandle {
            tracker: self.clone(),
            job_id,
            token,
            finished: false,
            _slot: guard,
        })
    }

    pub fn snapshot(&self) -> JobStatus {
        self.read_status().clone()
    }

    pub fn is_running(&self) -> bool {
        self.read_status().state.is_active()
    }

    /// Request cooperative cancellation of the running job.
    ///
    /// Returns false when no job is running.
    pub fn cancel(&self) -> bool {
        let mut status = self.write_status();
        if status.state != JobState::Running {
            return status.state == JobState::Stopping;
        }
        status.state = JobState::Stopping;
        self.inner
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();

        tracing::info!(kind = %self.inner.kind, job_id = ?status.job_id, "Job cancellation requested");
        true
    }
}

/// Exclusive right to run one job; releases the slot when dropped
pub struct JobHandle {
    tracker: JobTracker,
    job_id: Uuid,
    token: CancellationToken,
    finished: bool,
    _slot: OwnedMutexGuard<()>,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.tracker.kind()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn set_total(&self, total: usize) {
        self.tracker.write_status().total = total;
    }

    pub fn begin_file(&self, path: &str) {
        self.tracker.write_status().current_file = Some(path.to_string());
    }

    pub fn file_done(&self, outcome: FileOutcome) {
        let mut status = self.tracker.write_status();
        status.processed += 1;
        status.current_file = None;
        match outcome {
            FileOutcome::Added => status.added += 1,
            FileOutcome::Updated => status.updated += 1,
            FileOutcome::Skipped => status.skipped += 1,
            FileOutcome::Analyzed => status.analyzed += 1,
        }
    }

    pub fn file_failed(&self, message: impl Into<String>) {
        let mut status = self.tracker.write_status();
        status.processed += 1;
        status.failed += 1;
        status.current_file = None;
        status.last_error = Some(JobError {
            message: message.into(),
            processed: status.processed,
            total: status.total,
        });
    }

    /// Record a job-level error without counting a file
    pub fn record_error(&self, message: impl Into<String>) {
        let mut status = self.tracker.write_status();
        status.last_error = Some(JobError {
            message: message.into(),
            processed: status.processed,
            total: status.total,
        });
    }

    pub fn snapshot(&self) -> JobStatus {
        self.tracker.snapshot()
    }

    /// Move to a terminal state and release the slot
    pub fn finish(mut self, state: JobState) -> JobStatus {
        self.finished = true;
        self.mark_finished(state)
    }

    fn mark_finished(&self, state: JobState) -> JobStatus {
        let mut status = self.tracker.write_status();
        status.state = state;
        status.finished_at = Some(Utc::now());
        status.current_file = None;

        let elapsed_ms = status
            .started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        tracing::info!(
            kind = %status.kind,
            job_id = %self.job_id,
            state = ?state,
            processed = status.processed,
            total = status.total,
            failed = status.failed,
            elapsed_ms,
            "Job finished"
        );

        status.clone()
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.record_error("Worker exited without finishing the job");
            self.mark_finished(JobState::Failed);
        }
    }
}
