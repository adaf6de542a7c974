//! Windowed magnitude spectra for the spectral stages

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

/// Periodic Hann window
pub fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Reusable magnitude-spectrum computer for one frame size
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(size);
        Self {
            window: hann(size),
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
        }
    }

    pub fn size(&self) -> usize {
        self.input.len()
    }

    /// Window `frame` (zero-padded to the frame size) and write the
    /// `size / 2 + 1` magnitudes into `magnitudes`.
    pub fn magnitudes(&mut self, frame: &[f32], magnitudes: &mut Vec<f64>) {
        for (i, (slot, w)) in self.input.iter_mut().zip(&self.window).enumerate() {
            *slot = frame.get(i).copied().unwrap_or(0.0) as f64 * w;
        }

        magnitudes.clear();
        match self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            Ok(()) => magnitudes.extend(self.spectrum.iter().map(|c| c.norm())),
            Err(e) => {
                // Buffers come from the plan, so this only fires on a planner bug
                tracing::warn!(error = %e, "FFT failed, treating frame as silent");
                magnitudes.resize(self.spectrum.len(), 0.0);
            }
        }
    }
}
