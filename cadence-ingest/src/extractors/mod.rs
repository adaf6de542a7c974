//! Feature Extractor
//!
//! Pure function from decoded mono samples to a [`FeatureVector`]: no I/O,
//! no shared state. Stages run over the same analysis window so every field
//! derives from one signal, and identical input always yields identical
//! output.

pub mod fft;
pub mod harmonic;
pub mod rhythm;
pub mod spectral;
pub mod time_domain;

use cadence_common::models::FeatureVector;

/// RMS treated as full-scale energy
pub const RMS_CEILING: f64 = 0.4;

/// Loudness floor in dBFS (maps to 0.0; 0 dBFS maps to 1.0)
pub const LOUDNESS_FLOOR_DB: f64 = -60.0;

/// Danceability weights: rhythm regularity, tempo, energy
pub const DANCE_REGULARITY_WEIGHT: f64 = 0.5;
pub const DANCE_TEMPO_WEIGHT: f64 = 0.3;
pub const DANCE_ENERGY_WEIGHT: f64 = 0.2;

/// Tempo ramp for the danceability tempo score
pub const DANCE_TEMPO_LOW: f64 = 60.0;
pub const DANCE_TEMPO_HIGH: f64 = 180.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Longest stretch of audio analyzed, taken from the centre of the track
    pub max_analysis_seconds: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_analysis_seconds: 90.0,
        }
    }
}

/// Energy clipped against [`RMS_CEILING`]
pub fn energy_score(rms: f64) -> f64 {
    (rms / RMS_CEILING).clamp(0.0, 1.0)
}

/// RMS level mapped from [`LOUDNESS_FLOOR_DB`]..0 dBFS onto [0, 1]
pub fn loudness_score(rms: f64) -> f64 {
    if rms <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * rms.log10();
    ((db - LOUDNESS_FLOOR_DB) / -LOUDNESS_FLOOR_DB).clamp(0.0, 1.0)
}

/// Weighted blend of regularity, tempo ramp, and energy; always in [0, 1]
pub fn danceability(regularity: f64, tempo: f64, rms: f64) -> f64 {
    let tempo_score =
        ((tempo - DANCE_TEMPO_LOW) / (DANCE_TEMPO_HIGH - DANCE_TEMPO_LOW)).clamp(0.0, 1.0);
    let score = DANCE_REGULARITY_WEIGHT * regularity.clamp(0.0, 1.0)
        + DANCE_TEMPO_WEIGHT * tempo_score
        + DANCE_ENERGY_WEIGHT * energy_score(rms);
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Centre slice of at most `max_analysis_seconds`
    pub fn analysis_window<'a>(&self, samples: &'a [f32], sample_rate: u32) -> &'a [f32] {
        let max_seconds = self.config.max_analysis_seconds;
        if !(max_seconds > 0.0) || sample_rate == 0 {
            return samples;
        }
        let window = (max_seconds * sample_rate as f64) as usize;
        if samples.len() <= window {
            return samples;
        }
        let start = (samples.len() - window) / 2;
        &samples[start..start + window]
    }

    /// Extract the full feature vector. Silent or empty input produces
    /// zeroed descriptors (key 0, major, 4/4), never NaN.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> FeatureVector {
        let window = self.analysis_window(samples, sample_rate);

        let rms = finite_or_zero(time_domain::rms(window));
        let zcr = finite_or_zero(time_domain::zero_crossing_rate(window));
        let spectral = spectral::analyze(window, sample_rate);
        let rhythm = rhythm::analyze(&spectral.onset_envelope, spectral.frame_rate);
        let (key, mode) = harmonic::estimate_key(&spectral.chroma);

        let vector = FeatureVector {
            tempo: finite_or_zero(rhythm.tempo),
            key,
            mode,
            time_signature: rhythm.time_signature,
            energy: energy_score(rms),
            danceability: danceability(rhythm.regularity, rhythm.tempo, rms),
            brightness: finite_or_zero(spectral.centroid),
            loudness: loudness_score(rms),
            noisiness: zcr.clamp(0.0, 1.0),
            spectral_rolloff: finite_or_zero(spectral.rolloff),
            zero_crossing_rate: zcr,
            timbre: spectral.mfcc.iter().map(|&c| finite_or_zero(c)).collect(),
        };

        tracing::trace!(
            tempo = vector.tempo,
            key = vector.key,
            mode = vector.mode,
            energy = vector.energy,
            danceability = vector.danceability,
            "Features extracted"
        );

        vector
    }
}
