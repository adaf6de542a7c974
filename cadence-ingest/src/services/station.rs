//! Station building
//!
//! A station is the seed track followed by its nearest analyzed neighbours.
//! If the seed has no extracted features the station falls back to the most
//! recently added tracks and says so through [`Station::fallback`].

use cadence_common::db::Store;
use cadence_common::models::{AnalysisStatus, FeatureVector};
use cadence_common::Error;
use serde::Serialize;

use crate::db::{features, playlists, tracks};
use crate::error::IngestResult;
use crate::services::similarity::{rank, Candidate};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationEntry {
    pub track_id: i64,
    /// Distance from the seed; `None` for the seed itself and for fallback
    /// entries
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub seed_track_id: i64,
    /// Seed first
    pub tracks: Vec<StationEntry>,
    /// True when the seed had no features and entries are recent tracks
    /// rather than similar ones
    pub fallback: bool,
}

impl Station {
    pub fn track_ids(&self) -> Vec<i64> {
        self.tracks.iter().map(|entry| entry.track_id).collect()
    }
}

/// What the station read found for the seed
enum SeedLookup {
    Analyzed {
        seed: FeatureVector,
        candidates: Vec<(i64, FeatureVector)>,
    },
    Unanalyzed {
        recent: Vec<i64>,
    },
}

/// Build a station of at most `size` tracks, seed included
pub async fn create_station(store: &Store, seed_track_id: i64, size: usize) -> IngestResult<Station> {
    if size == 0 {
        return Err(Error::InvalidInput("Station size must be at least 1".to_string()).into());
    }

    let lookup = store
        .read("station::load", move |conn| {
            Box::pin(async move {
                let seed = tracks::get_by_id(conn, seed_track_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Track {}", seed_track_id)))?;

                let stored = features::load(conn, seed_track_id).await?;
                match stored {
                    Some(stored)
                        if stored.extracted && seed.analysis_status == AnalysisStatus::Analyzed =>
                    {
                        Ok(SeedLookup::Analyzed {
                            seed: stored.vector,
                            candidates: features::analyzed_candidates(conn).await?,
                        })
                    }
                    _ => {
                        // One extra row in case the seed itself is among the newest
                        let recent = tracks::recent(conn, size + 1).await?;
                        Ok(SeedLookup::Unanalyzed {
                            recent: recent.into_iter().map(|t| t.id).collect(),
                        })
                    }
                }
            })
        })
        .await?;

    let seed_entry = StationEntry {
        track_id: seed_track_id,
        distance: None,
    };

    let station = match lookup {
        SeedLookup::Analyzed { seed, candidates } => {
            let seed = Candidate {
                track_id: seed_track_id,
                features: seed,
            };
            let candidates: Vec<Candidate> = candidates
                .into_iter()
                .map(|(track_id, features)| Candidate { track_id, features })
                .collect();

            let mut entries = vec![seed_entry];
            entries.extend(rank(&seed, &candidates, size - 1).into_iter().map(|ranked| {
                StationEntry {
                    track_id: ranked.track_id,
                    distance: Some(ranked.distance),
                }
            }));

            Station {
                seed_track_id,
                tracks: entries,
                fallback: false,
            }
        }
        SeedLookup::Unanalyzed { recent } => {
            tracing::warn!(
                track_id = seed_track_id,
                "Seed track has no features, building station from recent tracks"
            );

            let mut entries = vec![seed_entry];
            entries.extend(
                recent
                    .into_iter()
                    .filter(|&id| id != seed_track_id)
                    .take(size - 1)
                    .map(|track_id| StationEntry {
                        track_id,
                        distance: None,
                    }),
            );

            Station {
                seed_track_id,
                tracks: entries,
                fallback: true,
            }
        }
    };

    tracing::debug!(
        track_id = seed_track_id,
        tracks = station.tracks.len(),
        fallback = station.fallback,
        "Station created"
    );
    Ok(station)
}

/// Persist a station as a playlist in station order; returns the playlist id
pub async fn save_station_as_playlist(store: &Store, station: &Station, name: &str) -> IngestResult<i64> {
    let name = name.to_string();
    let track_ids = station.track_ids();

    let playlist_id = store
        .write("station::save_playlist", move |conn| {
            let name = name.clone();
            let track_ids = track_ids.clone();
            Box::pin(async move { playlists::create(conn, &name, &track_ids).await })
        })
        .await?;

    tracing::info!(
        playlist_id,
        seed_track_id = station.seed_track_id,
        tracks = station.tracks.len(),
        "Station saved as playlist"
    );
    Ok(playlist_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use cadence_common::db::StoreOptions;
    use cadence_common::models::{FileStamp, TrackMetadata};

    async fn add(store: &Store, path: &str, analyzed: Option<FeatureVector>) -> i64 {
        let metadata = TrackMetadata {
            path: path.to_string(),
            title: path.to_string(),
            artist: None,
            album: None,
            duration: None,
            artist_image: None,
            stamp: FileStamp {
                size_bytes: 1,
                modified_ms: 1,
            },
        };
        store
            .write("test::add", move |conn| {
                let metadata = metadata.clone();
                let analyzed = analyzed.clone();
                Box::pin(async move {
                    let id = tracks::insert_or_update(conn, &metadata).await?.id;
                    if let Some(vector) = analyzed {
                        features::upsert(conn, id, &vector).await?;
                        tracks::set_status(conn, id, AnalysisStatus::Analyzed, None).await?;
                    }
                    Ok(id)
                })
            })
            .await
            .unwrap()
    }

    fn vector(tempo: f64) -> FeatureVector {
        FeatureVector {
            tempo,
            energy: 0.5,
            mode: 1,
            ..FeatureVector::placeholder()
        }
    }

    #[tokio::test]
    async fn test_station_starts_with_seed_and_orders_by_distance() {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        let seed = add(&store, "/m/seed.mp3", Some(vector(120.0))).await;
        let far = add(&store, "/m/far.mp3", Some(vector(60.0))).await;
        let near = add(&store, "/m/near.mp3", Some(vector(118.0))).await;
        let mid = add(&store, "/m/mid.mp3", Some(vector(100.0))).await;
        add(&store, "/m/pending.mp3", None).await;

        let station = create_station(&store, seed, 3).await.unwrap();
        assert!(!station.fallback);
        assert_eq!(station.track_ids(), vec![seed, near, mid]);
        assert_eq!(station.tracks[0].distance, None);

        let full = create_station(&store, seed, 50).await.unwrap();
        assert_eq!(full.track_ids(), vec![seed, near, mid, far]);
    }

    #[tokio::test]
    async fn test_unanalyzed_seed_falls_back_visibly() {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        let a = add(&store, "/m/a.mp3", Some(vector(120.0))).await;
        let b = add(&store, "/m/b.mp3", None).await;
        let seed = add(&store, "/m/seed.mp3", None).await;

        let station = create_station(&store, seed, 3).await.unwrap();
        assert!(station.fallback);
        assert_eq!(station.tracks[0].track_id, seed);
        assert_eq!(station.tracks.len(), 3);
        assert!(station.track_ids().contains(&a));
        assert!(station.track_ids().contains(&b));
    }

    #[tokio::test]
    async fn test_missing_seed_and_zero_size() {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        assert!(matches!(
            create_station(&store, 404, 5).await,
            Err(IngestError::Common(Error::NotFound(_)))
        ));

        let seed = add(&store, "/m/seed.mp3", Some(vector(120.0))).await;
        assert!(create_station(&store, seed, 0).await.is_err());
        assert_eq!(create_station(&store, seed, 1).await.unwrap().track_ids(), vec![seed]);
    }

    #[tokio::test]
    async fn test_save_station_as_playlist_keeps_order() {
        let store = Store::open(StoreOptions::in_memory()).await.unwrap();
        let seed = add(&store, "/m/seed.mp3", Some(vector(120.0))).await;
        add(&store, "/m/other.mp3", Some(vector(90.0))).await;

        let station = create_station(&store, seed, 5).await.unwrap();
        let playlist_id = save_station_as_playlist(&store, &station, "Seed radio").await.unwrap();

        let playlist = store
            .read("test::playlist", move |conn| Box::pin(playlists::load(conn, playlist_id)))
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<i64> = playlist.items.iter().map(|item| item.track_id).collect();
        assert_eq!(ids, station.track_ids());
        assert_eq!(playlist.name, "Seed radio");
    }
}
