//! Error types for cadence-ingest
//!
//! Per-file errors (`Decode`, `Metadata`) are counted by the running job and
//! never abort it. Store errors that exhausted their retry budget abort the
//! current job; everything committed before that point stays consistent.

use thiserror::Error;

use crate::services::file_scanner::ScanError;
use crate::services::job_tracker::JobKind;
use crate::services::metadata_extractor::MetadataError;
use crate::utils::audio_decoder::DecodeError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// cadence-common error (database, config, contention, pool)
    #[error(transparent)]
    Common(#[from] cadence_common::Error),

    /// File could not be decoded to PCM
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Tag reading failed
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Directory traversal failed before any file was examined
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// A job of this kind holds the slot; the request is rejected, not queued
    #[error("{0} job already running")]
    JobAlreadyRunning(JobKind),

    /// Blocking worker panicked or was cancelled by the runtime
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Common(cadence_common::Error::Database(err))
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Join(err.to_string())
    }
}

impl IngestError {
    /// True when the error ends the whole job instead of one file
    pub fn aborts_job(&self) -> bool {
        match self {
            IngestError::Common(err) => err.aborts_job(),
            _ => false,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
