//! Domain models shared by the ingest pipeline and readers
//!
//! A [`Track`] is identified by its unique file path. Every track owns exactly
//! one [`FeatureVector`] row; until analysis succeeds that row holds the
//! placeholder values from [`FeatureVector::placeholder`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Analysis lifecycle of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Discovered, waiting for signal analysis
    Pending,
    /// Feature vector extracted from the decoded signal
    Analyzed,
    /// Last analysis attempt could not decode or analyze the file
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Analyzed => "analyzed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "analyzed" => Ok(AnalysisStatus::Analyzed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown analysis status: {}",
                other
            ))),
        }
    }
}

/// Size and modification time used to detect changed files between scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size_bytes: i64,
    /// Modification time as whole milliseconds since the Unix epoch
    pub modified_ms: i64,
}

/// Persisted track row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub path: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub artist_image: Option<String>,
    pub size_bytes: i64,
    pub modified_ms: i64,
    pub date_added: DateTime<Utc>,
    pub liked: bool,
    pub analysis_status: AnalysisStatus,
    pub last_error: Option<String>,
}

impl Track {
    pub fn stamp(&self) -> FileStamp {
        FileStamp {
            size_bytes: self.size_bytes,
            modified_ms: self.modified_ms,
        }
    }
}

/// Track fields written by discovery (scan) before any analysis
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub path: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
    pub artist_image: Option<String>,
    pub stamp: FileStamp,
}

/// Acoustic features derived from one decoded signal
///
/// Scalar descriptors are normalized to [0, 1] except `tempo` (BPM),
/// `key` (pitch class 0-11), `mode` (0 = minor, 1 = major) and
/// `time_signature` (beats per bar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tempo: f64,
    pub key: u8,
    pub mode: u8,
    pub time_signature: u8,
    pub energy: f64,
    pub danceability: f64,
    pub brightness: f64,
    pub loudness: f64,
    pub noisiness: f64,
    /// Frequency below which 85% of spectral energy lies, normalized by Nyquist
    pub spectral_rolloff: f64,
    /// Mean zero-crossing rate over short frames
    pub zero_crossing_rate: f64,
    /// Mean mel-cepstral coefficients (timbre summary)
    pub timbre: Vec<f64>,
}

impl FeatureVector {
    pub const DEFAULT_TIME_SIGNATURE: u8 = 4;

    /// Zero-valued row written at discovery time
    pub fn placeholder() -> Self {
        Self {
            tempo: 0.0,
            key: 0,
            mode: 0,
            time_signature: Self::DEFAULT_TIME_SIGNATURE,
            energy: 0.0,
            danceability: 0.0,
            brightness: 0.0,
            loudness: 0.0,
            noisiness: 0.0,
            spectral_rolloff: 0.0,
            zero_crossing_rate: 0.0,
            timbre: Vec::new(),
        }
    }
}

/// Named, ordered list of tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub track_id: i64,
    pub position: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Analyzed,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AnalysisStatus>().unwrap(), status);
        }
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_placeholder_uses_common_time() {
        let placeholder = FeatureVector::placeholder();
        assert_eq!(placeholder.time_signature, 4);
        assert_eq!(placeholder.tempo, 0.0);
        assert!(placeholder.timbre.is_empty());
    }
}
