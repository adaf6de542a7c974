//! Similarity Engine
//!
//! Weighted Euclidean distance over a fixed subset of the feature vector.
//! Each term is a per-feature difference scaled to roughly [0, 1] and
//! multiplied by its weight before summing:
//!
//! | feature      | difference                          | weight |
//! |--------------|-------------------------------------|--------|
//! | tempo        | `min(|Δbpm| / 120, 1)`              | 2.0    |
//! | energy       | `Δ`                                 | 1.5    |
//! | danceability | `Δ`                                 | 1.5    |
//! | brightness   | `Δ`                                 | 1.0    |
//! | loudness     | `Δ`                                 | 0.75   |
//! | noisiness    | `Δ`                                 | 0.5    |
//! | key          | circular pitch-class distance / 6   | 1.0    |
//! | mode         | 0 if equal, else 1                  | 0.5    |

use cadence_common::models::FeatureVector;
use serde::Serialize;

pub const TEMPO_WEIGHT: f64 = 2.0;
pub const ENERGY_WEIGHT: f64 = 1.5;
pub const DANCEABILITY_WEIGHT: f64 = 1.5;
pub const BRIGHTNESS_WEIGHT: f64 = 1.0;
pub const LOUDNESS_WEIGHT: f64 = 0.75;
pub const NOISINESS_WEIGHT: f64 = 0.5;
pub const KEY_WEIGHT: f64 = 1.0;
pub const MODE_WEIGHT: f64 = 0.5;

/// Tempo difference treated as maximally different
pub const TEMPO_SPAN_BPM: f64 = 120.0;

/// Circular distance between pitch classes, normalized so a tritone is 1.0
pub fn key_distance(a: u8, b: u8) -> f64 {
    let diff = (a as i32 - b as i32).rem_euclid(12);
    diff.min(12 - diff) as f64 / 6.0
}

fn mode_distance(a: u8, b: u8) -> f64 {
    if a == b {
        0.0
    } else {
        1.0
    }
}

fn tempo_distance(a: f64, b: f64) -> f64 {
    ((a - b).abs() / TEMPO_SPAN_BPM).min(1.0)
}

/// Non-finite inputs count as zero so one corrupt row cannot poison a ranking
fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let terms = [
        (TEMPO_WEIGHT, tempo_distance(finite(a.tempo), finite(b.tempo))),
        (ENERGY_WEIGHT, finite(a.energy) - finite(b.energy)),
        (DANCEABILITY_WEIGHT, finite(a.danceability) - finite(b.danceability)),
        (BRIGHTNESS_WEIGHT, finite(a.brightness) - finite(b.brightness)),
        (LOUDNESS_WEIGHT, finite(a.loudness) - finite(b.loudness)),
        (NOISINESS_WEIGHT, finite(a.noisiness) - finite(b.noisiness)),
        (KEY_WEIGHT, key_distance(a.key % 12, b.key % 12)),
        (MODE_WEIGHT, mode_distance(a.mode, b.mode)),
    ];

    terms
        .iter()
        .map(|(weight, delta)| weight * delta * delta)
        .sum::<f64>()
        .sqrt()
}

/// A track's features, as fed to [`rank`]
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub track_id: i64,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedTrack {
    pub track_id: i64,
    pub distance: f64,
}

/// Up to `k` candidates in ascending distance from `seed`.
///
/// The seed's own track id is excluded. Equal distances keep input order.
pub fn rank(seed: &Candidate, candidates: &[Candidate], k: usize) -> Vec<RankedTrack> {
    let mut ranked: Vec<RankedTrack> = candidates
        .iter()
        .filter(|c| c.track_id != seed.track_id)
        .map(|c| RankedTrack {
            track_id: c.track_id,
            distance: distance(&seed.features, &c.features),
        })
        .collect();

    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    ranked.truncate(k);
    ranked
}
