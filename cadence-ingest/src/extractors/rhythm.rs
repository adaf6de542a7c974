//! Tempo, rhythm regularity, and meter from an onset-strength envelope

/// Tempo search range
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;

/// Centre and spread (in octaves) of the log-normal tempo prior
const PRIOR_CENTER_BPM: f64 = 120.0;
const PRIOR_OCTAVES: f64 = 1.0;

/// Triple meter wins only if its lag correlates clearly better
const TRIPLE_METER_MARGIN: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhythmSummary {
    /// Beats per minute; 0 when no periodicity was found
    pub tempo: f64,
    /// Strongest non-zero-lag autocorrelation peak over the zero-lag value, in [0, 1]
    pub regularity: f64,
    /// Beats per bar: 3 or 4
    pub time_signature: u8,
}

impl Default for RhythmSummary {
    fn default() -> Self {
        Self {
            tempo: 0.0,
            regularity: 0.0,
            time_signature: 4,
        }
    }
}

/// Autocorrelation of the mean-removed envelope for lags `0..=max_lag`
fn autocorrelation(envelope: &[f64], max_lag: usize) -> Vec<f64> {
    let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
    let centered: Vec<f64> = envelope.iter().map(|v| v - mean).collect();

    (0..=max_lag)
        .map(|lag| {
            centered[..centered.len() - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / PRIOR_CENTER_BPM).log2() / PRIOR_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

/// Sub-lag peak position from the three points around `lag`
fn refine_lag(ac: &[f64], lag: usize) -> f64 {
    if lag == 0 || lag + 1 >= ac.len() {
        return lag as f64;
    }
    let (left, center, right) = (ac[lag - 1], ac[lag], ac[lag + 1]);
    let curvature = left - 2.0 * center + right;
    if curvature.abs() <= f64::EPSILON {
        return lag as f64;
    }
    let offset = 0.5 * (left - right) / curvature;
    if offset.abs() < 1.0 {
        lag as f64 + offset
    } else {
        lag as f64
    }
}

/// Analyze an onset envelope sampled at `frame_rate` frames per second
pub fn analyze(envelope: &[f64], frame_rate: f64) -> RhythmSummary {
    if envelope.len() < 4 || !(frame_rate > 0.0) {
        return RhythmSummary::default();
    }

    let beat_lag_min = (frame_rate * 60.0 / MAX_BPM).ceil().max(1.0) as usize;
    let beat_lag_max = (frame_rate * 60.0 / MIN_BPM).floor() as usize;
    // Room for a four-beat bar at the slowest tempo
    let max_lag = (beat_lag_max * 4).min(envelope.len() - 1);
    if max_lag <= beat_lag_min {
        return RhythmSummary::default();
    }

    let ac = autocorrelation(envelope, max_lag);
    let energy = ac[0];
    if energy <= f64::EPSILON || !energy.is_finite() {
        return RhythmSummary::default();
    }

    let regularity = (1..max_lag)
        .filter(|&lag| ac[lag] > ac[lag - 1] && ac[lag] >= ac[lag + 1])
        .map(|lag| ac[lag] / energy)
        .fold(0.0_f64, f64::max)
        .clamp(0.0, 1.0);

    let mut best: Option<(usize, f64)> = None;
    for lag in beat_lag_min..=beat_lag_max.min(max_lag) {
        if ac[lag] <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f64;
        let score = ac[lag] * tempo_prior(bpm);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    let Some((beat_lag, _)) = best else {
        return RhythmSummary {
            regularity,
            ..RhythmSummary::default()
        };
    };

    let tempo = 60.0 * frame_rate / refine_lag(&ac, beat_lag);

    let time_signature = match (ac.get(3 * beat_lag), ac.get(4 * beat_lag)) {
        (Some(&triple), Some(&quadruple)) if triple > 0.0 && triple > quadruple * TRIPLE_METER_MARGIN => 3,
        _ => 4,
    };

    RhythmSummary {
        tempo: if tempo.is_finite() { tempo } else { 0.0 },
        regularity,
        time_signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Envelope with a unit pulse every `period` frames
    fn pulses(period: usize, frames: usize) -> Vec<f64> {
        (0..frames)
            .map(|i| if i % period == 0 { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn test_periodic_pulses_give_their_tempo() {
        // 100 frames/s, pulse every 50 frames = 120 BPM
        let summary = analyze(&pulses(50, 3000), 100.0);
        assert!((summary.tempo - 120.0).abs() < 1.0, "tempo {}", summary.tempo);
        assert!(summary.regularity > 0.8);
        assert_eq!(summary.time_signature, 4);
    }

    #[test]
    fn test_flat_envelope_has_no_rhythm() {
        assert_eq!(analyze(&[0.0; 2000], 100.0), RhythmSummary::default());
        assert_eq!(analyze(&[0.3; 2000], 100.0), RhythmSummary::default());
        assert_eq!(analyze(&[], 100.0), RhythmSummary::default());
    }

    #[test]
    fn test_accented_downbeat_every_third_pulse_is_triple() {
        // 120 BPM pulses, every third one accented
        let envelope: Vec<f64> = (0..6000)
            .map(|i| match (i % 50, (i / 50) % 3) {
                (0, 0) => 3.0,
                (0, _) => 1.0,
                _ => 0.0,
            })
            .collect();
        let summary = analyze(&envelope, 100.0);
        assert_eq!(summary.time_signature, 3);
        assert!(summary.regularity <= 1.0);
    }
}
