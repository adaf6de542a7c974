//! cadence-ingest library interface
//!
//! Scan-and-analyze pipeline for an audio library: discovery, feature
//! extraction, similarity ranking, and station building on top of the
//! `cadence-common` store. Exposed as a library for integration testing and
//! for the request-serving layer.

pub mod db;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

pub use crate::error::{IngestError, IngestResult};
pub use crate::extractors::{ExtractorConfig, FeatureExtractor};
pub use crate::services::LibraryService;
