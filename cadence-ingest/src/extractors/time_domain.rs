//! Time-domain reductions over the sample buffer

/// Frame length for zero-crossing rate
pub const ZCR_FRAME: usize = 2048;

/// Root-mean-square amplitude; 0 for an empty buffer
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Mean over frames of the fraction of adjacent sample pairs that change
/// sign. Result is in [0, 1].
pub fn zero_crossing_rate(samples: &[f32]) -> f64 {
    let mut total = 0.0;
    let mut frames = 0usize;

    for frame in samples.chunks(ZCR_FRAME) {
        if frame.len() < 2 {
            continue;
        }
        let crossings = frame
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count();
        total += crossings as f64 / (frame.len() - 1) as f64;
        frames += 1;
    }

    if frames == 0 {
        0.0
    } else {
        total / frames as f64
    }
}
