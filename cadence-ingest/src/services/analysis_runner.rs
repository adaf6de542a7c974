//! Analysis job
//!
//! Works through `pending` tracks, newest first. Each file is decoded and
//! analyzed on the blocking pool with no connection held; the feature row
//! and the `analyzed` status are then written in one transaction. A failed
//! file is marked `failed` and the job moves on, unless failures keep
//! coming back to back, in which case the circuit breaker stops the run.

use cadence_common::config::AnalysisConfig;
use cadence_common::db::Store;
use cadence_common::models::{AnalysisStatus, FeatureVector, Track};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::db::{features, tracks};
use crate::error::{IngestError, IngestResult};
use crate::extractors::FeatureExtractor;
use crate::services::consistency;
use crate::services::job_tracker::{FileOutcome, JobHandle, JobState, JobStatus, JobTracker};
use crate::utils::audio_decoder::{decode_audio_file, DecodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Process at most this many pending tracks
    pub limit: Option<usize>,
    /// Stop after this many failures in a row; 0 disables the breaker
    pub max_consecutive_errors: u32,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl AnalysisRequest {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            limit: config.limit,
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Completed,
    Cancelled,
    /// Stopped by the consecutive-failure circuit breaker
    CircuitOpen,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub status: AnalysisOutcome,
    pub job_id: Uuid,
    pub processed: usize,
    pub analyzed: usize,
    pub failed: usize,
    /// Tracks reset to pending before the run (re-analysis only)
    pub reset: u64,
    /// Corrections made by the consistency pass that opens every run
    pub reconciled: usize,
    pub error: Option<String>,
}

enum RunEnd {
    Completed,
    Cancelled,
    CircuitOpen(u32),
}

#[derive(Debug, Default)]
struct RunTotals {
    reset: u64,
    reconciled: usize,
}

#[derive(Clone)]
pub struct AnalysisRunner {
    store: Store,
    tracker: JobTracker,
    extractor: FeatureExtractor,
}

impl AnalysisRunner {
    /// `tracker` is the process-wide analysis slot
    pub fn new(store: Store, tracker: JobTracker, extractor: FeatureExtractor) -> Self {
        Self {
            store,
            tracker,
            extractor,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Analyze pending tracks on the caller's task
    pub async fn analyze_pending(&self, request: AnalysisRequest) -> IngestResult<AnalysisReport> {
        let handle = self.tracker.try_start()?;
        Ok(self.run(handle, request, false).await)
    }

    /// Background variant of [`analyze_pending`](Self::analyze_pending)
    pub fn start(&self, request: AnalysisRequest) -> IngestResult<Uuid> {
        self.spawn(request, false)
    }

    /// Reset every track to pending, then analyze them all. Shares the
    /// analysis slot, so it is rejected while any analysis runs.
    pub async fn reanalyze_all(&self, request: AnalysisRequest) -> IngestResult<AnalysisReport> {
        let handle = self.tracker.try_start()?;
        Ok(self.run(handle, request, true).await)
    }

    pub fn start_reanalyze(&self, request: AnalysisRequest) -> IngestResult<Uuid> {
        self.spawn(request, true)
    }

    fn spawn(&self, request: AnalysisRequest, reset_all: bool) -> IngestResult<Uuid> {
        let handle = self.tracker.try_start()?;
        let job_id = handle.job_id();

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(handle, request, reset_all).await;
        });

        Ok(job_id)
    }

    async fn run(&self, handle: JobHandle, request: AnalysisRequest, reset_all: bool) -> AnalysisReport {
        let started = Instant::now();
        let job_id = handle.job_id();
        tracing::info!(
            job_id = %job_id,
            limit = ?request.limit,
            max_consecutive_errors = request.max_consecutive_errors,
            reset_all,
            "Analysis started"
        );

        let mut totals = RunTotals::default();
        let (outcome, state, error) = match self.execute(&handle, &request, reset_all, &mut totals).await {
            Ok(RunEnd::Completed) => (AnalysisOutcome::Completed, JobState::Completed, None),
            Ok(RunEnd::Cancelled) => (AnalysisOutcome::Cancelled, JobState::Cancelled, None),
            Ok(RunEnd::CircuitOpen(failures)) => {
                let message = format!("Stopped after {} consecutive failures", failures);
                tracing::error!(job_id = %job_id, failures, "Analysis circuit breaker opened");
                handle.record_error(message.clone());
                (AnalysisOutcome::CircuitOpen, JobState::Failed, Some(message))
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Analysis aborted");
                handle.record_error(e.to_string());
                (AnalysisOutcome::Failed, JobState::Failed, Some(e.to_string()))
            }
        };

        let status = handle.finish(state);
        let report = report(outcome, job_id, &status, &totals, error);

        tracing::info!(
            job_id = %job_id,
            status = ?report.status,
            processed = report.processed,
            analyzed = report.analyzed,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis finished"
        );

        report
    }

    async fn execute(
        &self,
        handle: &JobHandle,
        request: &AnalysisRequest,
        reset_all: bool,
        totals: &mut RunTotals,
    ) -> IngestResult<RunEnd> {
        if reset_all {
            totals.reset = self
                .store
                .write("analysis::reset_all", |conn| Box::pin(tracks::reset_all_pending(conn)))
                .await?;
            tracing::info!(job_id = %handle.job_id(), tracks = totals.reset, "All tracks reset to pending");
        }

        totals.reconciled = consistency::reconcile(&self.store).await?.corrections.len();

        let limit = request.limit;
        let pending = self
            .store
            .read("analysis::pending", move |conn| Box::pin(tracks::pending(conn, limit)))
            .await?;
        handle.set_total(pending.len());

        let mut consecutive_failures = 0u32;
        for track in &pending {
            if handle.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            handle.begin_file(&track.path);
            match self.analyze_track(track).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    handle.file_done(FileOutcome::Analyzed);
                }
                Err(e) if e.aborts_job() => return Err(e),
                Err(e) => {
                    tracing::warn!(track_id = track.id, path = %track.path, error = %e, "Analysis failed");
                    self.mark_failed(track.id, &e.to_string()).await?;
                    handle.file_failed(format!("{}: {}", track.path, e));

                    consecutive_failures += 1;
                    if request.max_consecutive_errors > 0
                        && consecutive_failures >= request.max_consecutive_errors
                    {
                        return Ok(RunEnd::CircuitOpen(consecutive_failures));
                    }
                }
            }
        }

        Ok(RunEnd::Completed)
    }

    /// Decode, extract, and store one track's features
    async fn analyze_track(&self, track: &Track) -> IngestResult<()> {
        let started = Instant::now();
        let path = PathBuf::from(&track.path);
        let extractor = self.extractor.clone();

        let vector = tokio::task::spawn_blocking(move || -> Result<FeatureVector, DecodeError> {
            let audio = decode_audio_file(&path)?;
            Ok(extractor.extract(&audio.samples, audio.sample_rate))
        })
        .await??;

        let track_id = track.id;
        self.store
            .write("analysis::store_features", move |conn| {
                let vector = vector.clone();
                Box::pin(async move {
                    tracks::set_status(conn, track_id, AnalysisStatus::Analyzed, None).await?;
                    features::upsert(conn, track_id, &vector).await
                })
            })
            .await?;

        tracing::debug!(
            track_id,
            path = %track.path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Track analyzed"
        );
        Ok(())
    }

    /// Record a per-file failure. A track deleted mid-run is not an error.
    async fn mark_failed(&self, track_id: i64, message: &str) -> IngestResult<()> {
        let message = message.to_string();
        let result = self
            .store
            .write("analysis::mark_failed", move |conn| {
                let message = message.clone();
                Box::pin(async move {
                    tracks::set_status(conn, track_id, AnalysisStatus::Failed, Some(&message)).await
                })
            })
            .await;

        match result {
            Ok(()) | Err(cadence_common::Error::NotFound(_)) => Ok(()),
            Err(e) => Err(IngestError::from(e)),
        }
    }
}

fn report(
    status: AnalysisOutcome,
    job_id: Uuid,
    job: &JobStatus,
    totals: &RunTotals,
    error: Option<String>,
) -> AnalysisReport {
    AnalysisReport {
        status,
        job_id,
        processed: job.processed,
        analyzed: job.analyzed,
        failed: job.failed,
        reset: totals.reset,
        reconciled: totals.reconciled,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_tracker::JobKind;
    use cadence_common::db::StoreOptions;
    use cadence_common::models::{FileStamp, TrackMetadata};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_tone(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..22050 {
            let t = i as f32 / 22050.0;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn runner() -> AnalysisRunner {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        AnalysisRunner::new(store, JobTracker::new(JobKind::Analysis), FeatureExtractor::default())
    }

    async fn add_track(runner: &AnalysisRunner, path: &Path) -> i64 {
        let metadata = TrackMetadata {
            path: path.to_string_lossy().into_owned(),
            title: "t".to_string(),
            artist: None,
            album: None,
            duration: None,
            artist_image: None,
            stamp: FileStamp {
                size_bytes: 0,
                modified_ms: 0,
            },
        };
        runner
            .store
            .write("test::insert", move |conn| {
                let metadata = metadata.clone();
                Box::pin(async move { Ok(tracks::insert_or_update(conn, &metadata).await?.id) })
            })
            .await
            .unwrap()
    }

    async fn status_of(runner: &AnalysisRunner, id: i64) -> AnalysisStatus {
        runner
            .store
            .read("test::get", move |conn| Box::pin(tracks::get_by_id(conn, id)))
            .await
            .unwrap()
            .unwrap()
            .analysis_status
    }

    #[tokio::test]
    async fn test_good_and_bad_files() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("tone.wav");
        let bad = temp_dir.path().join("broken.wav");
        write_tone(&good);
        std::fs::write(&bad, b"definitely not RIFF").unwrap();

        let runner = runner().await;
        let good_id = add_track(&runner, &good).await;
        let bad_id = add_track(&runner, &bad).await;

        let report = runner.analyze_pending(AnalysisRequest::default()).await.unwrap();
        assert_eq!(report.status, AnalysisOutcome::Completed);
        assert_eq!(report.processed, 2);
        assert_eq!(report.analyzed, 1);
        assert_eq!(report.failed, 1);

        assert_eq!(status_of(&runner, good_id).await, AnalysisStatus::Analyzed);
        assert_eq!(status_of(&runner, bad_id).await, AnalysisStatus::Failed);

        let stored = runner
            .store
            .read("test::features", move |conn| Box::pin(features::load(conn, good_id)))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.extracted);
        assert_eq!(stored.vector.key, 9);

        let bad_features = runner
            .store
            .read("test::features", move |conn| Box::pin(features::load(conn, bad_id)))
            .await
            .unwrap()
            .unwrap();
        assert!(!bad_features.extracted);
    }

    #[tokio::test]
    async fn test_circuit_breaker_stops_run() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner().await;
        for i in 0..4 {
            let path = temp_dir.path().join(format!("broken{}.wav", i));
            std::fs::write(&path, b"junk").unwrap();
            add_track(&runner, &path).await;
        }

        let report = runner
            .analyze_pending(AnalysisRequest {
                limit: None,
                max_consecutive_errors: 2,
            })
            .await
            .unwrap();

        assert_eq!(report.status, AnalysisOutcome::CircuitOpen);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 2);
        let job = runner.tracker().snapshot();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.last_error.unwrap().message.contains("2 consecutive"));
    }

    #[tokio::test]
    async fn test_limit_and_busy_slot() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner().await;
        for i in 0..3 {
            let path = temp_dir.path().join(format!("missing{}.wav", i));
            add_track(&runner, &path).await;
        }

        let held = runner.tracker().try_start().unwrap();
        assert!(matches!(
            runner.analyze_pending(AnalysisRequest::default()).await,
            Err(IngestError::JobAlreadyRunning(JobKind::Analysis))
        ));
        assert!(runner.start_reanalyze(AnalysisRequest::default()).is_err());
        held.finish(JobState::Completed);

        let report = runner
            .analyze_pending(AnalysisRequest {
                limit: Some(2),
                max_consecutive_errors: 0,
            })
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.status, AnalysisOutcome::Completed);
    }

    #[tokio::test]
    async fn test_reanalyze_resets_everything() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("tone.wav");
        write_tone(&good);

        let runner = runner().await;
        let id = add_track(&runner, &good).await;
        runner.analyze_pending(AnalysisRequest::default()).await.unwrap();

        let report = runner.reanalyze_all(AnalysisRequest::default()).await.unwrap();
        assert_eq!(report.reset, 1);
        assert_eq!(report.analyzed, 1);
        assert_eq!(status_of(&runner, id).await, AnalysisStatus::Analyzed);
    }
}
