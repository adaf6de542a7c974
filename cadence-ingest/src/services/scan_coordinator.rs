//! Scan Coordinator
//!
//! Discovery pass over a directory tree: enumerate matching files, check a
//! whole batch against the store with one lookup, read tags for new or
//! changed files, and write each track with its placeholder feature row in
//! one transaction. Signal analysis is left to the analysis job.
//!
//! No connection is held while walking the tree, reading tags, or waiting
//! on the enrichment collaborator.

use cadence_common::config::ScanConfig;
use cadence_common::db::Store;
use cadence_common::models::FileStamp;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::tracks;
use crate::error::{IngestError, IngestResult};
use crate::services::enrichment::{enrich_metadata, MetadataEnricher, NoopEnricher};
use crate::services::file_scanner::{FileScanner, ScanError};
use crate::services::job_tracker::{FileOutcome, JobHandle, JobState, JobStatus, JobTracker};
use crate::services::metadata_extractor::{file_stamp, MetadataError, MetadataExtractor};

const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of one scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub root: PathBuf,
    pub recursive: bool,
    pub extensions: Vec<String>,
    pub batch_size: usize,
}

impl ScanRequest {
    /// Scan `root` with the default extensions and batch size
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &ScanConfig::default())
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &ScanConfig) -> Self {
        Self {
            root: root.into(),
            recursive: config.recursive,
            extensions: config.extensions.clone(),
            batch_size: config.batch_size,
        }
    }

    fn validate(&self) -> IngestResult<()> {
        if self.batch_size == 0 {
            return Err(cadence_common::Error::InvalidInput(
                "Scan batch size must be at least 1".to_string(),
            )
            .into());
        }
        if self.extensions.is_empty() {
            return Err(ScanError::NoExtensions.into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
    Failed,
    /// Another scan held the slot; nothing was done
    Skipped,
}

/// Aggregate counts returned by [`ScanCoordinator::scan`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub status: ScanOutcome,
    pub job_id: Option<Uuid>,
    pub processed: usize,
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Message of the error that ended a failed scan
    pub error: Option<String>,
}

impl ScanReport {
    fn skipped() -> Self {
        Self {
            status: ScanOutcome::Skipped,
            job_id: None,
            processed: 0,
            added: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            error: None,
        }
    }

    fn from_status(status: ScanOutcome, job: &JobStatus, error: Option<String>) -> Self {
        Self {
            status,
            job_id: job.job_id,
            processed: job.processed,
            added: job.added,
            updated: job.updated,
            skipped: job.skipped,
            errors: job.failed,
            error,
        }
    }
}

/// How a scan worker stopped short of an error
enum RunEnd {
    Completed,
    Cancelled,
}

#[derive(Clone)]
pub struct ScanCoordinator {
    store: Store,
    tracker: JobTracker,
    extractor: MetadataExtractor,
    enricher: Arc<dyn MetadataEnricher>,
    enrich_timeout: Duration,
}

impl ScanCoordinator {
    /// `tracker` is the process-wide scan slot
    pub fn new(store: Store, tracker: JobTracker) -> Self {
        Self {
            store,
            tracker,
            extractor: MetadataExtractor::new(),
            enricher: Arc::new(NoopEnricher),
            enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>, timeout: Duration) -> Self {
        self.enricher = enricher;
        self.enrich_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Run a scan to completion on the caller's task.
    ///
    /// A scan already in progress makes this return immediately with
    /// [`ScanOutcome::Skipped`] and leaves the running scan untouched.
    pub async fn scan(&self, request: ScanRequest) -> IngestResult<ScanReport> {
        request.validate()?;
        let handle = match self.tracker.try_start() {
            Ok(handle) => handle,
            Err(IngestError::JobAlreadyRunning(_)) => {
                tracing::info!(root = %request.root.display(), "Scan already running, request skipped");
                return Ok(ScanReport::skipped());
            }
            Err(e) => return Err(e),
        };
        Ok(self.run(handle, request).await)
    }

    /// Start a scan in the background and return its job id.
    ///
    /// Fails fast with `JobAlreadyRunning` while another scan holds the slot.
    pub fn start(&self, request: ScanRequest) -> IngestResult<Uuid> {
        request.validate()?;
        let handle = self.tracker.try_start()?;
        let job_id = handle.job_id();

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run(handle, request).await;
        });

        Ok(job_id)
    }

    async fn run(&self, handle: JobHandle, request: ScanRequest) -> ScanReport {
        let started = Instant::now();
        tracing::info!(
            job_id = %handle.job_id(),
            root = %request.root.display(),
            recursive = request.recursive,
            batch_size = request.batch_size,
            "Scan started"
        );

        let (outcome, state, error) = match self.execute(&handle, &request).await {
            Ok(RunEnd::Completed) => (ScanOutcome::Completed, JobState::Completed, None),
            Ok(RunEnd::Cancelled) => (ScanOutcome::Cancelled, JobState::Cancelled, None),
            Err(e) => {
                tracing::error!(job_id = %handle.job_id(), error = %e, "Scan aborted");
                handle.record_error(e.to_string());
                (ScanOutcome::Failed, JobState::Failed, Some(e.to_string()))
            }
        };

        let status = handle.finish(state);
        let report = ScanReport::from_status(outcome, &status, error);

        tracing::info!(
            job_id = ?report.job_id,
            status = ?report.status,
            processed = report.processed,
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan finished"
        );

        report
    }

    async fn execute(&self, handle: &JobHandle, request: &ScanRequest) -> IngestResult<RunEnd> {
        let files = discover(request).await?;
        handle.set_total(files.len());

        tracing::info!(job_id = %handle.job_id(), files = files.len(), "Discovery complete");

        for batch in files.chunks(request.batch_size) {
            if handle.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            let keys: Vec<String> = batch.iter().map(|(key, _)| key.clone()).collect();
            let known = self.lookup(keys).await?;
            let stamps = stat_batch(batch).await?;

            for ((key, path), stamp) in batch.iter().zip(stamps) {
                if handle.is_cancelled() {
                    return Ok(RunEnd::Cancelled);
                }

                handle.begin_file(key);
                match self.process_file(path.clone(), stamp, known.get(key)).await {
                    Ok(outcome) => {
                        tracing::debug!(path = %key, outcome = ?outcome, "File scanned");
                        handle.file_done(outcome);
                    }
                    Err(e) if e.aborts_job() => return Err(e),
                    Err(e) => {
                        tracing::warn!(path = %key, error = %e, "Failed to scan file");
                        handle.file_failed(format!("{}: {}", key, e));
                    }
                }
            }
        }

        Ok(RunEnd::Completed)
    }

    /// Stored stamps for one batch, in a single round-trip
    async fn lookup(&self, keys: Vec<String>) -> IngestResult<HashMap<String, FileStamp>> {
        let known = self
            .store
            .read("scan::batch_lookup", move |conn| {
                let keys = keys.clone();
                Box::pin(async move { tracks::batch_lookup(conn, &keys).await })
            })
            .await?;
        Ok(known)
    }

    async fn process_file(
        &self,
        path: PathBuf,
        stamp: std::io::Result<FileStamp>,
        known: Option<&FileStamp>,
    ) -> IngestResult<FileOutcome> {
        let stamp = stamp.map_err(MetadataError::from)?;
        if known == Some(&stamp) {
            return Ok(FileOutcome::Skipped);
        }

        let extractor = self.extractor;
        let metadata = tokio::task::spawn_blocking(move || extractor.extract(&path)).await??;
        let metadata = enrich_metadata(self.enricher.as_ref(), metadata, self.enrich_timeout).await;

        let write = self
            .store
            .write("scan::insert_track", move |conn| {
                let metadata = metadata.clone();
                Box::pin(async move { tracks::insert_or_update(conn, &metadata).await })
            })
            .await?;

        Ok(if write.inserted {
            FileOutcome::Added
        } else {
            FileOutcome::Updated
        })
    }
}

/// Walk the tree off the runtime. Paths are made absolute and deduplicated
/// so one file always maps to one track key.
async fn discover(request: &ScanRequest) -> IngestResult<Vec<(String, PathBuf)>> {
    let scanner = FileScanner::new(request.extensions.as_slice(), request.recursive);
    let root = request.root.clone();

    let files = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, ScanError> {
        let root = canonical_root(&root)?;
        scanner.scan(&root)
    })
    .await??;

    let mut seen = HashSet::with_capacity(files.len());
    Ok(files
        .into_iter()
        .map(|path| (path.to_string_lossy().into_owned(), path))
        .filter(|(key, _)| seen.insert(key.clone()))
        .collect())
}

fn canonical_root(root: &Path) -> Result<PathBuf, ScanError> {
    std::fs::canonicalize(root).map_err(|_| ScanError::PathNotFound(root.to_path_buf()))
}

async fn stat_batch(batch: &[(String, PathBuf)]) -> IngestResult<Vec<std::io::Result<FileStamp>>> {
    let paths: Vec<PathBuf> = batch.iter().map(|(_, path)| path.clone()).collect();
    let stamps =
        tokio::task::spawn_blocking(move || paths.iter().map(|p| file_stamp(p)).collect::<Vec<_>>())
            .await?;
    Ok(stamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_tracker::JobKind;
    use cadence_common::db::StoreOptions;
    use tempfile::TempDir;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..8000 {
            writer.write_sample(((i % 40) as i16 - 20) * 500).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn coordinator() -> ScanCoordinator {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        ScanCoordinator::new(store, JobTracker::new(JobKind::Scan))
    }

    #[tokio::test]
    async fn test_scan_adds_then_skips() {
        let temp_dir = TempDir::new().unwrap();
        write_wav(&temp_dir.path().join("one.wav"));
        write_wav(&temp_dir.path().join("two.wav"));
        std::fs::write(temp_dir.path().join("notes.txt"), "not audio").unwrap();

        let coordinator = coordinator().await;
        let first = coordinator.scan(ScanRequest::new(temp_dir.path())).await.unwrap();
        assert_eq!(first.status, ScanOutcome::Completed);
        assert_eq!(first.processed, 2);
        assert_eq!(first.added, 2);

        let second = coordinator.scan(ScanRequest::new(temp_dir.path())).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.errors, 0);
    }

    #[tokio::test]
    async fn test_busy_slot_reports_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let coordinator = coordinator().await;
        let held = coordinator.tracker().try_start().unwrap();

        let report = coordinator.scan(ScanRequest::new(temp_dir.path())).await.unwrap();
        assert_eq!(report.status, ScanOutcome::Skipped);
        assert_eq!(report.job_id, None);

        assert!(matches!(
            coordinator.start(ScanRequest::new(temp_dir.path())),
            Err(IngestError::JobAlreadyRunning(JobKind::Scan))
        ));
        held.finish(JobState::Completed);
    }

    #[tokio::test]
    async fn test_missing_root_fails_job() {
        let coordinator = coordinator().await;
        let report = coordinator
            .scan(ScanRequest::new("/definitely/not/a/music/dir"))
            .await
            .unwrap();

        assert_eq!(report.status, ScanOutcome::Failed);
        assert!(report.error.unwrap().contains("not found"));
        assert_eq!(coordinator.tracker().snapshot().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let coordinator = coordinator().await;
        let mut request = ScanRequest::new(temp_dir.path());
        request.batch_size = 0;
        assert!(coordinator.scan(request).await.is_err());
        assert_eq!(coordinator.tracker().snapshot().state, JobState::Idle);
    }
}
