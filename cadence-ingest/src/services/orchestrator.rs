//! Library service
//!
//! Single entry point for the request-serving layer and the CLI: owns the
//! store handle and one job slot per job kind, and exposes jobs, status
//! snapshots, stations, and track management. Cloning is cheap; every clone
//! shares the same slots.

use cadence_common::config::CadenceConfig;
use cadence_common::db::{FlushOutcome, Store};
use cadence_common::models::Track;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::tracks::{self, StatusCounts};
use crate::error::IngestResult;
use crate::extractors::{ExtractorConfig, FeatureExtractor};
use crate::services::analysis_runner::{AnalysisReport, AnalysisRequest, AnalysisRunner};
use crate::services::consistency::{self, ReconcileReport};
use crate::services::enrichment::MetadataEnricher;
use crate::services::job_tracker::{JobKind, JobStatus, JobTracker};
use crate::services::maintenance::MaintenanceTask;
use crate::services::scan_coordinator::{ScanCoordinator, ScanReport, ScanRequest};
use crate::services::station::{self, Station};

#[derive(Clone)]
pub struct LibraryService {
    store: Store,
    config: Arc<CadenceConfig>,
    scanner: ScanCoordinator,
    analyzer: AnalysisRunner,
}

impl LibraryService {
    pub fn new(store: Store, config: CadenceConfig) -> Self {
        let scanner = ScanCoordinator::new(store.clone(), JobTracker::new(JobKind::Scan));
        let extractor = FeatureExtractor::new(ExtractorConfig {
            max_analysis_seconds: config.analysis.max_analysis_seconds,
        });
        let analyzer = AnalysisRunner::new(store.clone(), JobTracker::new(JobKind::Analysis), extractor);

        Self {
            store,
            config: Arc::new(config),
            scanner,
            analyzer,
        }
    }

    /// Route tag lookups through an external catalog collaborator
    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        let timeout = Duration::from_millis(self.config.scan.enrich_timeout_ms);
        self.scanner = self.scanner.with_enricher(enricher, timeout);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// Scan request for `root` using the configured extensions and batch size
    pub fn scan_request(&self, root: impl Into<std::path::PathBuf>) -> ScanRequest {
        ScanRequest::from_config(root, &self.config.scan)
    }

    pub fn analysis_request(&self) -> AnalysisRequest {
        AnalysisRequest::from_config(&self.config.analysis)
    }

    pub async fn scan(&self, request: ScanRequest) -> IngestResult<ScanReport> {
        self.scanner.scan(request).await
    }

    pub fn start_scan(&self, request: ScanRequest) -> IngestResult<Uuid> {
        self.scanner.start(request)
    }

    pub async fn analyze_pending(&self, request: AnalysisRequest) -> IngestResult<AnalysisReport> {
        self.analyzer.analyze_pending(request).await
    }

    pub fn start_analysis(&self, request: AnalysisRequest) -> IngestResult<Uuid> {
        self.analyzer.start(request)
    }

    pub async fn reanalyze_all(&self, request: AnalysisRequest) -> IngestResult<AnalysisReport> {
        self.analyzer.reanalyze_all(request).await
    }

    pub fn start_reanalyze(&self, request: AnalysisRequest) -> IngestResult<Uuid> {
        self.analyzer.start_reanalyze(request)
    }

    pub fn scan_status(&self) -> JobStatus {
        self.scanner.tracker().snapshot()
    }

    pub fn analysis_status(&self) -> JobStatus {
        self.analyzer.tracker().snapshot()
    }

    /// Returns false when no job of that kind is running
    pub fn cancel(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Scan => self.scanner.tracker().cancel(),
            JobKind::Analysis => self.analyzer.tracker().cancel(),
        }
    }

    pub async fn reconcile(&self) -> IngestResult<ReconcileReport> {
        consistency::reconcile(&self.store).await
    }

    /// Station of the configured size when `size` is `None`
    pub async fn create_station(&self, seed_track_id: i64, size: Option<usize>) -> IngestResult<Station> {
        let size = size.unwrap_or(self.config.station.size);
        station::create_station(&self.store, seed_track_id, size).await
    }

    pub async fn save_station_as_playlist(&self, station: &Station, name: &str) -> IngestResult<i64> {
        station::save_station_as_playlist(&self.store, station, name).await
    }

    pub async fn track(&self, track_id: i64) -> IngestResult<Option<Track>> {
        let track = self
            .store
            .read("library::track", move |conn| Box::pin(tracks::get_by_id(conn, track_id)))
            .await?;
        Ok(track)
    }

    pub async fn set_liked(&self, track_id: i64, liked: bool) -> IngestResult<()> {
        self.store
            .write("library::set_liked", move |conn| {
                Box::pin(tracks::set_liked(conn, track_id, liked))
            })
            .await?;
        Ok(())
    }

    /// Delete a track with its features and playlist entries
    pub async fn delete_track(&self, track_id: i64) -> IngestResult<bool> {
        let deleted = self
            .store
            .write("library::delete_track", move |conn| {
                Box::pin(tracks::delete_track(conn, track_id))
            })
            .await?;
        if deleted {
            tracing::info!(track_id, "Track deleted");
        }
        Ok(deleted)
    }

    pub async fn count_by_status(&self) -> IngestResult<StatusCounts> {
        let counts = self
            .store
            .read("library::count_by_status", |conn| Box::pin(tracks::count_by_status(conn)))
            .await?;
        Ok(counts)
    }

    pub async fn flush(&self, force: bool) -> IngestResult<FlushOutcome> {
        Ok(self.store.flush(force).await?)
    }

    /// Start the periodic flush / consistency loop
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        MaintenanceTask::new(
            self.store.clone(),
            self.analyzer.tracker().clone(),
            &self.config.maintenance,
        )
        .spawn(shutdown)
    }
}
