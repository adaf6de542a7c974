//! Short-time Fourier analysis
//!
//! One pass over overlapping Hann-windowed frames produces every
//! frequency-domain summary: spectral centroid, 85% rolloff, mean MFCCs,
//! the chroma histogram, and the spectral-flux onset envelope used by the
//! rhythm stage.

use super::fft::SpectrumAnalyzer;
use super::harmonic;

pub const FRAME_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 512;

/// Fraction of spectral energy below the rolloff frequency
pub const ROLLOFF_FRACTION: f64 = 0.85;

pub const MEL_BANDS: usize = 26;
pub const MFCC_COUNT: usize = 13;

/// Frames whose magnitude sum is below this are treated as silent
const SILENT_FRAME: f64 = 1e-9;

/// Onset envelope smoothing (moving average, frames)
const ENVELOPE_SMOOTHING: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSummary {
    /// Mean spectral centroid over non-silent frames, normalized by Nyquist
    pub centroid: f64,
    /// Mean rolloff frequency over non-silent frames, normalized by Nyquist
    pub rolloff: f64,
    /// Mean mel-cepstral coefficients (`MFCC_COUNT` values)
    pub mfcc: Vec<f64>,
    /// Pitch-class energy averaged over frames
    pub chroma: [f64; 12],
    /// Smoothed spectral flux, one value per frame
    pub onset_envelope: Vec<f64>,
    /// Envelope values per second
    pub frame_rate: f64,
}

impl SpectralSummary {
    fn silent(frame_rate: f64) -> Self {
        Self {
            centroid: 0.0,
            rolloff: 0.0,
            mfcc: vec![0.0; MFCC_COUNT],
            chroma: [0.0; 12],
            onset_envelope: Vec::new(),
            frame_rate,
        }
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters over `bins` FFT bins, spanning 0 Hz to Nyquist
struct MelFilterbank {
    /// (first bin, weights) per band
    filters: Vec<(usize, Vec<f64>)>,
}

impl MelFilterbank {
    fn new(bands: usize, fft_size: usize, sample_rate: f64) -> Self {
        let bins = fft_size / 2 + 1;
        let nyquist = sample_rate / 2.0;
        let max_mel = hz_to_mel(nyquist);
        let edges: Vec<f64> = (0..bands + 2)
            .map(|i| mel_to_hz(max_mel * i as f64 / (bands + 1) as f64) * fft_size as f64 / sample_rate)
            .collect();

        let filters = (0..bands)
            .map(|band| {
                let (left, center, right) = (edges[band], edges[band + 1], edges[band + 2]);
                let first = left.floor().max(0.0) as usize;
                let last = (right.ceil() as usize).min(bins - 1);
                let weights = (first..=last)
                    .map(|bin| {
                        let b = bin as f64;
                        if b <= left || b >= right {
                            0.0
                        } else if b <= center {
                            (b - left) / (center - left).max(f64::EPSILON)
                        } else {
                            (right - b) / (right - center).max(f64::EPSILON)
                        }
                    })
                    .collect();
                (first, weights)
            })
            .collect();

        Self { filters }
    }

    /// Log mel energies for one power spectrum
    fn log_energies(&self, power: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.extend(self.filters.iter().map(|(first, weights)| {
            let energy: f64 = weights
                .iter()
                .zip(&power[*first..])
                .map(|(w, p)| w * p)
                .sum();
            (energy + 1e-10).ln()
        }));
    }
}

/// DCT-II of the log mel energies, first `MFCC_COUNT` coefficients
fn dct_coefficients(log_mel: &[f64], out: &mut [f64]) {
    let n = log_mel.len() as f64;
    for (k, coefficient) in out.iter_mut().enumerate() {
        *coefficient = log_mel
            .iter()
            .enumerate()
            .map(|(i, v)| v * (std::f64::consts::PI * k as f64 * (i as f64 + 0.5) / n).cos())
            .sum();
    }
}

/// Centroid bin index, or None for a silent frame
fn centroid_bin(magnitudes: &[f64]) -> Option<f64> {
    let total: f64 = magnitudes.iter().sum();
    if total <= SILENT_FRAME {
        return None;
    }
    let weighted: f64 = magnitudes.iter().enumerate().map(|(k, m)| k as f64 * m).sum();
    Some(weighted / total)
}

fn rolloff_bin(power: &[f64]) -> usize {
    let total: f64 = power.iter().sum();
    let threshold = total * ROLLOFF_FRACTION;
    let mut cumulative = 0.0;
    for (k, p) in power.iter().enumerate() {
        cumulative += p;
        if cumulative >= threshold {
            return k;
        }
    }
    power.len().saturating_sub(1)
}

fn smooth(values: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = width / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            values[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Run the STFT over `samples` and summarize it
pub fn analyze(samples: &[f32], sample_rate: u32) -> SpectralSummary {
    let sample_rate = sample_rate as f64;
    let frame_rate = if sample_rate > 0.0 {
        sample_rate / HOP_SIZE as f64
    } else {
        0.0
    };
    if samples.is_empty() || sample_rate <= 0.0 {
        return SpectralSummary::silent(frame_rate);
    }

    let mut analyzer = SpectrumAnalyzer::new(FRAME_SIZE);
    let filterbank = MelFilterbank::new(MEL_BANDS, FRAME_SIZE, sample_rate);
    let last_bin = (FRAME_SIZE / 2) as f64;

    let mut magnitudes = Vec::with_capacity(FRAME_SIZE / 2 + 1);
    let mut previous: Vec<f64> = vec![0.0; FRAME_SIZE / 2 + 1];
    let mut power = Vec::with_capacity(FRAME_SIZE / 2 + 1);
    let mut log_mel = Vec::with_capacity(MEL_BANDS);
    let mut frame_mfcc = vec![0.0; MFCC_COUNT];

    let mut centroid_sum = 0.0;
    let mut rolloff_sum = 0.0;
    let mut mfcc_sum = vec![0.0; MFCC_COUNT];
    let mut voiced_frames = 0usize;
    let mut chroma = [0.0; 12];
    let mut frames = 0usize;
    let mut flux = Vec::new();

    // Short inputs still get one zero-padded frame
    let frame_count = if samples.len() <= FRAME_SIZE {
        1
    } else {
        1 + (samples.len() - FRAME_SIZE) / HOP_SIZE
    };

    for index in 0..frame_count {
        let start = index * HOP_SIZE;
        let end = (start + FRAME_SIZE).min(samples.len());
        analyzer.magnitudes(&samples[start..end], &mut magnitudes);
        frames += 1;

        let onset: f64 = magnitudes
            .iter()
            .zip(&previous)
            .map(|(now, before)| (now - before).max(0.0))
            .sum();
        flux.push(onset);
        previous.copy_from_slice(&magnitudes);

        let Some(centroid) = centroid_bin(&magnitudes) else {
            continue;
        };

        power.clear();
        power.extend(magnitudes.iter().map(|m| m * m));

        centroid_sum += centroid / last_bin;
        rolloff_sum += rolloff_bin(&power) as f64 / last_bin;

        filterbank.log_energies(&power, &mut log_mel);
        dct_coefficients(&log_mel, &mut frame_mfcc);
        for (sum, value) in mfcc_sum.iter_mut().zip(&frame_mfcc) {
            *sum += value;
        }

        harmonic::accumulate_chroma(&magnitudes, sample_rate, FRAME_SIZE, &mut chroma);
        voiced_frames += 1;
    }

    if voiced_frames == 0 {
        return SpectralSummary::silent(frame_rate);
    }

    for value in chroma.iter_mut() {
        *value /= frames as f64;
    }

    SpectralSummary {
        centroid: (centroid_sum / voiced_frames as f64).clamp(0.0, 1.0),
        rolloff: (rolloff_sum / voiced_frames as f64).clamp(0.0, 1.0),
        mfcc: mfcc_sum.iter().map(|s| s / voiced_frames as f64).collect(),
        chroma,
        onset_envelope: smooth(&flux, ENVELOPE_SMOOTHING),
        frame_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(frequency: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_is_all_defaults() {
        let summary = analyze(&vec![0.0; 22050], 22050);
        assert_eq!(summary.centroid, 0.0);
        assert_eq!(summary.rolloff, 0.0);
        assert_eq!(summary.mfcc, vec![0.0; MFCC_COUNT]);
        assert_eq!(summary.chroma, [0.0; 12]);
    }

    #[test]
    fn test_higher_tone_is_brighter() {
        let low = analyze(&tone(220.0, 22050, 1.0), 22050);
        let high = analyze(&tone(4000.0, 22050, 1.0), 22050);
        assert!(high.centroid > low.centroid);
        assert!(high.rolloff > low.rolloff);
        assert!(low.centroid > 0.0 && high.centroid < 1.0);
        assert_eq!(low.mfcc.len(), MFCC_COUNT);
        assert!(low.mfcc.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_a440_lands_in_pitch_class_a() {
        let summary = analyze(&tone(440.0, 22050, 1.0), 22050);
        let strongest = summary
            .chroma
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(pc, _)| pc)
            .unwrap();
        assert_eq!(strongest, 9);
    }

    #[test]
    fn test_short_input_gets_one_frame() {
        let summary = analyze(&tone(440.0, 22050, 0.01), 22050);
        assert_eq!(summary.onset_envelope.len(), 1);
        assert!(summary.centroid > 0.0);
    }
}
