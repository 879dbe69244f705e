//! Spectrum analyser over a backend sample tap
//!
//! Nothing runs in the background: every call to
//! [`Analyser::frequency_data`] pulls the latest window from the tap, applies
//! a Hann window and returns `size` magnitude bins in dB. Callers decide the
//! cadence, usually once per rendered frame.

use crate::audio::backend::SampleTap;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Floor for reported magnitudes (silence)
pub const MIN_DECIBELS: f32 = -100.0;

fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Cheap to clone; clones share the tap and the FFT plan
#[derive(Clone)]
pub struct Analyser {
    size: usize,
    tap: Arc<dyn SampleTap>,
    fft: Arc<dyn Fft<f32>>,
    window: Arc<[f32]>,
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser").field("size", &self.size).finish()
    }
}

impl Analyser {
    /// `size` is the number of output bins; the FFT runs over twice that
    pub fn new(size: usize, tap: Arc<dyn SampleTap>) -> Self {
        let size = size.max(2).next_power_of_two();
        let fft_size = size * 2;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let window = (0..fft_size).map(|i| hann_window(i, fft_size)).collect();

        Self {
            size,
            tap,
            fft,
            window,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Current magnitude spectrum in dB, `size` bins from DC up to Nyquist
    pub fn frequency_data(&self) -> Vec<f32> {
        let fft_size = self.size * 2;
        let mut samples = vec![0.0; fft_size];
        self.tap.snapshot(&mut samples);

        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        buffer[..self.size]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / fft_size as f32;
                (20.0 * magnitude.max(1e-10).log10()).max(MIN_DECIBELS)
            })
            .collect()
    }

    /// Raw time-domain window, oldest first
    pub fn waveform(&self) -> Vec<f32> {
        let mut samples = vec![0.0; self.size * 2];
        self.tap.snapshot(&mut samples);
        samples
    }
}
