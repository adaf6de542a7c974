//! Ingest services
//!
//! - Discovery: file scanner, tag reader, enrichment seam, scan coordinator
//! - Analysis: analysis runner, consistency pass
//! - Similarity and stations
//! - Job state, maintenance, and the [`LibraryService`] facade

pub mod analysis_runner;
pub mod consistency;
pub mod enrichment;
pub mod file_scanner;
pub mod job_tracker;
pub mod maintenance;
pub mod metadata_extractor;
pub mod orchestrator;
pub mod scan_coordinator;
pub mod similarity;
pub mod station;

pub use analysis_runner::{AnalysisOutcome, AnalysisReport, AnalysisRequest, AnalysisRunner};
pub use consistency::{reconcile, Inconsistency, InconsistentStateError, ReconcileReport};
pub use enrichment::{Enrichment, MetadataEnricher, NoopEnricher};
pub use file_scanner::{FileScanner, ScanError};
pub use job_tracker::{JobKind, JobState, JobStatus, JobTracker};
pub use maintenance::MaintenanceTask;
pub use metadata_extractor::{MetadataError, MetadataExtractor};
pub use orchestrator::LibraryService;
pub use scan_coordinator::{ScanCoordinator, ScanOutcome, ScanReport, ScanRequest};
pub use similarity::{key_distance, rank, Candidate, RankedTrack};
pub use station::{create_station, save_station_as_playlist, Station, StationEntry};
