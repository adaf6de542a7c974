//! Queries over the canonical schema
//!
//! Every function takes a `&mut SqliteConnection`; callers run them through
//! `Store::read` / `Store::write` so retry and transaction scope are applied
//! in one place.

pub mod features;
pub mod playlists;
pub mod tracks;
