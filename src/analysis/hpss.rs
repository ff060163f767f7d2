//! Harmonic/percussive separation by median filtering the STFT magnitude.
//!
//! Sustained partials are smooth along time and transients are smooth along
//! frequency, so a median across frames enhances the harmonic part and a
//! median across bins enhances the percussive part. Soft masks built from the
//! two enhanced magnitudes split the complex spectrum, and each half is
//! resynthesized by windowed overlap-add:
//!
//! ```text
//! mask_h = H^p / (H^p + P^p)    mask_p = P^p / (H^p + P^p)
//! ```
//!
//! The masks sum to one, so `harmonic + percussive` reconstructs the input.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use super::frames::hann_periodic;
use crate::config::HpssConfig;

const WINDOW_SUM_FLOOR: f32 = 1e-8;

/// The two halves of a separated signal, each as long as the input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HpssOutput {
    pub harmonic: Vec<f32>,
    pub percussive: Vec<f32>,
}

/// Median-filter HPSS over a centered Hann STFT.
#[derive(Clone)]
pub struct HpssSeparator {
    n_fft: usize,
    hop: usize,
    harmonic_kernel: usize,
    percussive_kernel: usize,
    mask_power: f64,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl HpssSeparator {
    pub fn new(config: &HpssConfig) -> Self {
        let n_fft = config.n_fft.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop: config.hop.clamp(1, n_fft),
            harmonic_kernel: odd_kernel(config.harmonic_kernel),
            percussive_kernel: odd_kernel(config.percussive_kernel),
            mask_power: config.mask_power.max(f32::EPSILON) as f64,
            window: hann_periodic(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn separate(&self, signal: &[f32]) -> HpssOutput {
        if signal.is_empty() {
            return HpssOutput::default();
        }
        let spectrum = self.stft(signal);
        let magnitude: Vec<Vec<f32>> = spectrum
            .iter()
            .map(|frame| frame.iter().map(|bin| bin.norm()).collect())
            .collect();
        let harmonic_env = median_along_time(&magnitude, self.harmonic_kernel);
        let percussive_env = median_along_frequency(&magnitude, self.percussive_kernel);

        let mut harmonic = spectrum.clone();
        let mut percussive = spectrum;
        for t in 0..harmonic.len() {
            for k in 0..harmonic[t].len() {
                let (mask_h, mask_p) =
                    soft_masks(harmonic_env[t][k], percussive_env[t][k], self.mask_power);
                harmonic[t][k] *= mask_h;
                percussive[t][k] *= mask_p;
            }
        }
        tracing::debug!(
            "HPSS split {} samples over {} frames",
            signal.len(),
            harmonic.len()
        );
        HpssOutput {
            harmonic: self.istft(&harmonic, signal.len()),
            percussive: self.istft(&percussive, signal.len()),
        }
    }

    fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Frames centered on multiples of `hop`, zero-padded by `n_fft / 2`.
    fn stft(&self, signal: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let offset = self.n_fft / 2;
        let frames = 1 + signal.len().div_ceil(self.hop);
        let mut padded = vec![0.0_f32; (frames - 1) * self.hop + self.n_fft];
        padded[offset..offset + signal.len()].copy_from_slice(signal);

        let mut buffer = vec![Complex::<f32>::default(); self.n_fft];
        let mut scratch = vec![Complex::<f32>::default(); self.forward.get_inplace_scratch_len()];
        let mut out = Vec::with_capacity(frames);
        for frame in 0..frames {
            let start = frame * self.hop;
            for (i, cell) in buffer.iter_mut().enumerate() {
                *cell = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.forward.process_with_scratch(&mut buffer, &mut scratch);
            out.push(buffer[..self.bins()].to_vec());
        }
        out
    }

    fn istft(&self, spectrum: &[Vec<Complex<f32>>], len: usize) -> Vec<f32> {
        let offset = self.n_fft / 2;
        let total = (spectrum.len().saturating_sub(1)) * self.hop + self.n_fft;
        let mut output = vec![0.0_f32; total];
        let mut window_sum = vec![0.0_f32; total];
        let mut buffer = vec![Complex::<f32>::default(); self.n_fft];
        let mut scratch = vec![Complex::<f32>::default(); self.inverse.get_inplace_scratch_len()];
        let bins = self.bins();
        let scale = 1.0 / self.n_fft as f32;

        for (frame, half) in spectrum.iter().enumerate() {
            buffer[..bins].copy_from_slice(half);
            for k in bins..self.n_fft {
                buffer[k] = half[self.n_fft - k].conj();
            }
            self.inverse.process_with_scratch(&mut buffer, &mut scratch);
            let start = frame * self.hop;
            for (i, sample) in buffer.iter().enumerate() {
                output[start + i] += sample.re * scale * self.window[i];
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }
        for (sample, weight) in output.iter_mut().zip(&window_sum) {
            if *weight > WINDOW_SUM_FLOOR {
                *sample /= weight;
            }
        }
        output.drain(..offset);
        output.truncate(len);
        output.resize(len, 0.0);
        output
    }
}

fn odd_kernel(kernel: usize) -> usize {
    kernel.max(1) | 1
}

/// Split weights for one bin; an all-zero bin is shared evenly.
fn soft_masks(harmonic: f32, percussive: f32, power: f64) -> (f32, f32) {
    let h = (harmonic as f64).powf(power);
    let p = (percussive as f64).powf(power);
    let total = h + p;
    if total <= f64::MIN_POSITIVE {
        return (0.5, 0.5);
    }
    ((h / total) as f32, (p / total) as f32)
}

/// Per-bin median over `kernel` neighbouring frames, edges repeated.
fn median_along_time(magnitude: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    let frames = magnitude.len();
    let bins = magnitude.first().map_or(0, Vec::len);
    let radius = kernel / 2;
    let mut window = Vec::with_capacity(kernel);
    let mut out = vec![vec![0.0_f32; bins]; frames];
    for k in 0..bins {
        for (t, row) in out.iter_mut().enumerate() {
            window.clear();
            window.extend((0..kernel).map(|j| {
                let index = (t + j).saturating_sub(radius).min(frames - 1);
                magnitude[index][k]
            }));
            row[k] = median(&mut window);
        }
    }
    out
}

/// Per-frame median over `kernel` neighbouring bins, edges repeated.
fn median_along_frequency(magnitude: &[Vec<f32>], kernel: usize) -> Vec<Vec<f32>> {
    let radius = kernel / 2;
    let mut window = Vec::with_capacity(kernel);
    magnitude
        .iter()
        .map(|frame| {
            let last = frame.len().saturating_sub(1);
            (0..frame.len())
                .map(|k| {
                    window.clear();
                    window.extend((0..kernel).map(|j| {
                        frame[(k + j).saturating_sub(radius).min(last)]
                    }));
                    median(&mut window)
                })
                .collect()
        })
        .collect()
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, value, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *value
}
