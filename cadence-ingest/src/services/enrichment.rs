//! Metadata enrichment seam
//!
//! External catalog lookups (tags, artist images) sit behind
//! [`MetadataEnricher`]. They may be slow, fail, or return partial data;
//! every call is time-boxed and any failure falls back to the tags read
//! from the file. Enrichment runs before the write transaction opens.

use anyhow::Result;
use async_trait::async_trait;
use cadence_common::models::TrackMetadata;
use std::time::Duration;

/// Partial metadata returned by an enricher; `None` fields keep the file's
/// own value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artist_image: Option<String>,
}

#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    /// Look up better metadata for a discovered file
    async fn enrich(&self, basic: &TrackMetadata) -> Result<Option<Enrichment>>;

    /// URL or local path of an image for `artist`
    async fn artist_image(&self, artist: &str) -> Result<Option<String>>;
}

/// Enricher that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnricher;

#[async_trait]
impl MetadataEnricher for NoopEnricher {
    async fn enrich(&self, _basic: &TrackMetadata) -> Result<Option<Enrichment>> {
        Ok(None)
    }

    async fn artist_image(&self, _artist: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

fn take_non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Overlay the non-empty fields of `enrichment` onto `basic`
pub fn apply(mut basic: TrackMetadata, enrichment: Enrichment) -> TrackMetadata {
    if let Some(title) = take_non_empty(enrichment.title) {
        basic.title = title;
    }
    if let Some(artist) = take_non_empty(enrichment.artist) {
        basic.artist = Some(artist);
    }
    if let Some(album) = take_non_empty(enrichment.album) {
        basic.album = Some(album);
    }
    if let Some(image) = take_non_empty(enrichment.artist_image) {
        basic.artist_image = Some(image);
    }
    basic
}

/// Run both enricher calls with `timeout` each. Never fails.
pub async fn enrich_metadata(
    enricher: &dyn MetadataEnricher,
    basic: TrackMetadata,
    timeout: Duration,
) -> TrackMetadata {
    let path = basic.path.clone();

    let mut metadata = match tokio::time::timeout(timeout, enricher.enrich(&basic)).await {
        Ok(Ok(Some(enrichment))) => apply(basic, enrichment),
        Ok(Ok(None)) => basic,
        Ok(Err(e)) => {
            tracing::warn!(path = %path, error = %e, "Metadata enrichment failed, keeping file tags");
            basic
        }
        Err(_) => {
            tracing::warn!(
                path = %path,
                timeout_ms = timeout.as_millis() as u64,
                "Metadata enrichment timed out, keeping file tags"
            );
            basic
        }
    };

    if metadata.artist_image.is_none() {
        if let Some(artist) = metadata.artist.clone() {
            match tokio::time::timeout(timeout, enricher.artist_image(&artist)).await {
                Ok(Ok(image)) => metadata.artist_image = take_non_empty(image),
                Ok(Err(e)) => {
                    tracing::debug!(artist = %artist, error = %e, "Artist image lookup failed");
                }
                Err(_) => {
                    tracing::debug!(artist = %artist, "Artist image lookup timed out");
                }
            }
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::models::FileStamp;

    fn basic() -> TrackMetadata {
        TrackMetadata {
            path: "/music/song.mp3".to_string(),
            title: "song".to_string(),
            artist: Some("Band".to_string()),
            album: None,
            duration: Some(180.0),
            artist_image: None,
            stamp: FileStamp {
                size_bytes: 10,
                modified_ms: 1,
            },
        }
    }

    struct PartialEnricher;

    #[async_trait]
    impl MetadataEnricher for PartialEnricher {
        async fn enrich(&self, _basic: &TrackMetadata) -> Result<Option<Enrichment>> {
            Ok(Some(Enrichment {
                title: Some("Song (Remastered)".to_string()),
                artist: Some("   ".to_string()),
                album: Some("Greatest Hits".to_string()),
                artist_image: None,
            }))
        }

        async fn artist_image(&self, artist: &str) -> Result<Option<String>> {
            Ok(Some(format!("https://img.example/{}.jpg", artist)))
        }
    }

    struct BrokenEnricher;

    #[async_trait]
    impl MetadataEnricher for BrokenEnricher {
        async fn enrich(&self, _basic: &TrackMetadata) -> Result<Option<Enrichment>> {
            anyhow::bail!("catalog unavailable")
        }

        async fn artist_image(&self, _artist: &str) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some("never".to_string()))
        }
    }

    #[tokio::test]
    async fn test_partial_enrichment_keeps_file_values() {
        let enriched = enrich_metadata(&PartialEnricher, basic(), Duration::from_secs(1)).await;
        assert_eq!(enriched.title, "Song (Remastered)");
        assert_eq!(enriched.artist.as_deref(), Some("Band"));
        assert_eq!(enriched.album.as_deref(), Some("Greatest Hits"));
        assert_eq!(
            enriched.artist_image.as_deref(),
            Some("https://img.example/Band.jpg")
        );
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_fall_back() {
        let enriched = enrich_metadata(&BrokenEnricher, basic(), Duration::from_millis(20)).await;
        assert_eq!(enriched, basic());
    }

    #[tokio::test]
    async fn test_noop_enricher_is_identity() {
        let enriched = enrich_metadata(&NoopEnricher, basic(), Duration::from_secs(1)).await;
        assert_eq!(enriched, basic());
    }
}
