//! Audio Test Fixture Generator
//!
//! Short mono WAV files with a known character: a steady tone, a click
//! track at a fixed tempo, or something that only looks like audio.

use std::path::{Path, PathBuf};

pub const SAMPLE_RATE: u32 = 22050;

/// Shape of the generated signal
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    /// Sine tone at the given frequency (Hz)
    Tone(f32),
    /// Decaying clicks at the given tempo (BPM)
    Clicks(f32),
    Silence,
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f32,
    pub signal: Signal,
    pub amplitude: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 2.0,
            signal: Signal::Tone(440.0),
            amplitude: 0.5,
        }
    }
}

/// Write a 16-bit mono WAV at [`SAMPLE_RATE`]
pub fn generate_test_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_samples = (config.duration_seconds * SAMPLE_RATE as f32) as usize;

    for i in 0..total_samples {
        let t = i as f32 / SAMPLE_RATE as f32;
        let value = match config.signal {
            Signal::Tone(freq) => (2.0 * std::f32::consts::PI * freq * t).sin(),
            Signal::Clicks(bpm) => {
                let period = 60.0 / bpm;
                let since_click = t % period;
                // 1 kHz burst decaying over ~20 ms
                (2.0 * std::f32::consts::PI * 1000.0 * t).sin() * (-since_click * 200.0).exp()
            }
            Signal::Silence => 0.0,
        };
        writer.write_sample((value * config.amplitude * i16::MAX as f32) as i16)?;
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

pub fn tone(path: &Path, freq: f32) -> PathBuf {
    generate_test_wav(
        path,
        &AudioConfig {
            signal: Signal::Tone(freq),
            ..AudioConfig::default()
        },
    )
    .expect("Failed to write tone fixture")
}

pub fn clicks(path: &Path, bpm: f32) -> PathBuf {
    generate_test_wav(
        path,
        &AudioConfig {
            duration_seconds: 4.0,
            signal: Signal::Clicks(bpm),
            ..AudioConfig::default()
        },
    )
    .expect("Failed to write click fixture")
}

/// File with an audio extension that no decoder accepts
pub fn corrupt(path: &Path) -> PathBuf {
    std::fs::write(path, b"RIFF\x00\x00\x00\x00not really a wave file").expect("Failed to write fixture");
    path.to_path_buf()
}
