//! Database Test Utilities

use cadence_common::config::CadenceConfig;
use cadence_common::db::{Store, StoreOptions};
use cadence_common::models::{AnalysisStatus, FileStamp, Track, TrackMetadata};
use cadence_ingest::db::{features, tracks};
use cadence_ingest::LibraryService;
use std::path::Path;

/// Library service over a private in-memory store
pub async fn memory_library() -> LibraryService {
    let store = Store::open(StoreOptions::in_memory())
        .await
        .expect("Failed to open in-memory store");
    LibraryService::new(store, CadenceConfig::default())
}

/// Library service over a WAL database file inside `dir`
pub async fn disk_library(dir: &Path) -> LibraryService {
    let store = Store::open(StoreOptions::disk(dir.join("library.db")))
        .await
        .expect("Failed to open disk store");
    LibraryService::new(store, CadenceConfig::default())
}

pub fn metadata(path: &str) -> TrackMetadata {
    TrackMetadata {
        path: path.to_string(),
        title: Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        artist: None,
        album: None,
        duration: None,
        artist_image: None,
        stamp: FileStamp {
            size_bytes: 0,
            modified_ms: 0,
        },
    }
}

/// Insert a pending track row directly, bypassing discovery
pub async fn insert_track(store: &Store, metadata: TrackMetadata) -> i64 {
    store
        .write("test::insert_track", move |conn| {
            let metadata = metadata.clone();
            Box::pin(async move { Ok(tracks::insert_or_update(conn, &metadata).await?.id) })
        })
        .await
        .expect("Failed to insert track")
}

pub async fn all_tracks(store: &Store) -> Vec<Track> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM tracks ORDER BY id")
        .fetch_all(store.pool())
        .await
        .expect("Failed to list tracks");
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let track = store
            .read("test::get_track", move |conn| Box::pin(tracks::get_by_id(conn, id)))
            .await
            .expect("Failed to read track");
        out.extend(track);
    }
    out
}

pub async fn track_by_path(store: &Store, path: &str) -> Option<Track> {
    let path = path.to_string();
    store
        .read("test::track_by_path", move |conn| {
            let path = path.clone();
            Box::pin(async move { tracks::get_or_none(conn, &path).await })
        })
        .await
        .expect("Failed to read track")
}

pub async fn has_extracted_features(store: &Store, track_id: i64) -> bool {
    store
        .read("test::features", move |conn| Box::pin(features::load(conn, track_id)))
        .await
        .expect("Failed to read features")
        .map(|stored| stored.extracted)
        .unwrap_or(false)
}

/// Analyzed tracks that lack an extracted feature row
pub async fn analyzed_without_features(store: &Store) -> usize {
    let mut count = 0;
    for track in all_tracks(store).await {
        if track.analysis_status == AnalysisStatus::Analyzed
            && !has_extracted_features(store, track.id).await
        {
            count += 1;
        }
    }
    count
}

pub async fn row_count(store: &Store, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .expect("Failed to count rows")
}
