//! Tag metadata extraction
//!
//! Cheap discovery-time read of title/artist/album/duration using lofty.
//! No audio is decoded here.

use cadence_common::models::{FileStamp, TrackMetadata};
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// lofty could not parse the container or its tags
    #[error("Failed to read tags: {0}")]
    ReadError(String),

    /// I/O error (stat or open)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Size and modification time of a file on disk
pub fn file_stamp(path: &Path) -> std::io::Result<FileStamp> {
    let metadata = std::fs::metadata(path)?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    Ok(FileStamp {
        size_bytes: metadata.len() as i64,
        modified_ms,
    })
}

/// Title used when the file carries no title tag
fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn non_empty(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Read tags and properties for one file
    pub fn extract(&self, file_path: &Path) -> Result<TrackMetadata, MetadataError> {
        let stamp = file_stamp(file_path)?;

        let tagged_file = Probe::open(file_path)
            .map_err(|e| MetadataError::ReadError(e.to_string()))?
            .read()
            .map_err(|e| MetadataError::ReadError(e.to_string()))?;

        let duration = tagged_file.properties().duration().as_secs_f64();
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

        let (title, artist, album) = match tag {
            Some(tag) => (
                non_empty(tag.title()),
                non_empty(tag.artist()),
                non_empty(tag.album()),
            ),
            None => (None, None, None),
        };

        let metadata = TrackMetadata {
            path: file_path.to_string_lossy().into_owned(),
            title: title.unwrap_or_else(|| fallback_title(file_path)),
            artist,
            album,
            duration: (duration > 0.0).then_some(duration),
            artist_image: None,
            stamp,
        };

        tracing::debug!(
            path = %file_path.display(),
            title = %metadata.title,
            artist = ?metadata.artist,
            duration_s = duration,
            "Extracted metadata"
        );

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(8000 * seconds) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_untagged_file_falls_back_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Quiet Song.wav");
        write_wav(&path, 2);

        let metadata = MetadataExtractor::new().extract(&path).unwrap();
        assert_eq!(metadata.title, "Quiet Song");
        assert!(metadata.artist.is_none());
        let duration = metadata.duration.unwrap();
        assert!((duration - 2.0).abs() < 0.05);
        assert!(metadata.stamp.size_bytes > 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = MetadataExtractor::new().extract(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(result, Err(MetadataError::IoError(_))));
    }
}
