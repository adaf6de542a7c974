//! Integration test helpers
//!
//! Shared fixtures for cadence-ingest integration tests.

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;

pub use audio_generator::*;
pub use db_utils::*;
