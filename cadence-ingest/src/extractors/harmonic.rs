//! Chroma accumulation and key/mode estimation
//!
//! Pitch classes are numbered from C = 0 to B = 11.

/// Spectral range folded into the chroma histogram
pub const CHROMA_MIN_HZ: f64 = 55.0;
pub const CHROMA_MAX_HZ: f64 = 5000.0;

/// Binary scale templates rooted at pitch class 0
pub const MAJOR_TEMPLATE: [f64; 12] = [1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
pub const MINOR_TEMPLATE: [f64; 12] = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];

pub const MODE_MINOR: u8 = 0;
pub const MODE_MAJOR: u8 = 1;

/// Pitch class of a frequency (equal temperament, A4 = 440 Hz)
pub fn pitch_class(frequency: f64) -> usize {
    let midi = 69.0 + 12.0 * (frequency / 440.0).log2();
    (midi.round() as i64).rem_euclid(12) as usize
}

/// Add one frame's spectral energy to the chroma histogram
pub fn accumulate_chroma(magnitudes: &[f64], sample_rate: f64, fft_size: usize, chroma: &mut [f64; 12]) {
    let bin_hz = sample_rate / fft_size as f64;
    for (k, magnitude) in magnitudes.iter().enumerate().skip(1) {
        let frequency = k as f64 * bin_hz;
        if frequency < CHROMA_MIN_HZ {
            continue;
        }
        if frequency > CHROMA_MAX_HZ {
            break;
        }
        chroma[pitch_class(frequency)] += magnitude * magnitude;
    }
}

/// Pearson correlation; 0 when either side has no variance
fn correlation(a: &[f64; 12], b: &[f64; 12]) -> f64 {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() {
        0.0
    } else {
        cov / denom
    }
}

/// Dominant pitch class and mode for a time-averaged chroma vector.
///
/// Silent or flat chroma yields key 0, major.
pub fn estimate_key(chroma: &[f64; 12]) -> (u8, u8) {
    let total: f64 = chroma.iter().sum();
    if total <= f64::EPSILON || !total.is_finite() {
        return (0, MODE_MAJOR);
    }

    let mut key = 0usize;
    for (pc, &energy) in chroma.iter().enumerate() {
        if energy > chroma[key] {
            key = pc;
        }
    }

    let mut aligned = [0.0; 12];
    for (i, slot) in aligned.iter_mut().enumerate() {
        *slot = chroma[(key + i) % 12];
    }

    let major = correlation(&aligned, &MAJOR_TEMPLATE);
    let minor = correlation(&aligned, &MINOR_TEMPLATE);
    let mode = if minor > major { MODE_MINOR } else { MODE_MAJOR };

    (key as u8, mode)
}
