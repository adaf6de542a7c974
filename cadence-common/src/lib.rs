//! # Cadence Common Library
//!
//! Shared code for the Cadence library services:
//! - Error type and result alias
//! - Configuration loading (TOML + environment)
//! - Logging setup
//! - Domain models (tracks, feature vectors, playlists)
//! - Persistence layer (pooled SQLite store, retry policy, snapshots)

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use error::{Error, Result};
