//! Whole-excerpt tempo summary from the log-mel onset envelope.
//!
//! The onset envelope is the mean positive frame-to-frame rise of the
//! log-mel rows. Its windowed autocorrelation, averaged over time, is the
//! tempogram fed to the model; the strongest lag inside the BPM search range
//! gives the tempo estimate.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use serde::Serialize;

use super::frames::hann_periodic;
use super::matrix::FeatureMatrix;
use crate::config::TempoConfig;

const AUTOCORR_FLOOR: f32 = f32::MIN_POSITIVE;

/// Tempo features of one excerpt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempoFeatures {
    /// Estimated tempo, or 0 when no periodicity was found.
    pub bpm: f32,
    /// Peak prominence in `[0, 1]`.
    pub confidence: f32,
    /// Mean normalized autocorrelation for lags `0..tempo_len`.
    pub tempogram: Vec<f32>,
}

/// Estimates tempo from an onset envelope sampled at `frame_rate`.
#[derive(Clone)]
pub struct TempoEstimator {
    frame_rate: f32,
    win_length: usize,
    tempo_len: usize,
    min_bpm: f32,
    max_bpm: f32,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl TempoEstimator {
    /// `hop` is the sample hop of the log-mel frames the envelope comes from.
    pub fn new(sample_rate: u32, hop: usize, config: &TempoConfig) -> Self {
        let win_length = config.win_length.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            frame_rate: sample_rate as f32 / hop.max(1) as f32,
            win_length,
            tempo_len: config.tempo_len,
            min_bpm: config.min_bpm.min(config.max_bpm),
            max_bpm: config.max_bpm.max(config.min_bpm),
            window: hann_periodic(win_length),
            forward: planner.plan_fft_forward(2 * win_length),
            inverse: planner.plan_fft_inverse(2 * win_length),
        }
    }

    pub fn tempo_len(&self) -> usize {
        self.tempo_len
    }

    /// Summarize the excerpt whose log-mel matrix is `log_mel`.
    pub fn estimate(&self, log_mel: &FeatureMatrix) -> TempoFeatures {
        let onset = onset_strength(log_mel);
        let curve = self.mean_tempogram(&onset);
        let (bpm, confidence) = self.pick_tempo(&curve);
        let mut tempogram = curve;
        tempogram.resize(self.tempo_len, 0.0);
        TempoFeatures {
            bpm,
            confidence,
            tempogram,
        }
    }

    /// Autocorrelation tempogram: one normalized `win_length`-lag row per onset frame.
    ///
    /// The envelope is centered with `win_length / 2` ramp samples on each
    /// side, so frame `t` is the window centered on onset sample `t`.
    pub fn tempogram(&self, onset: &[f32]) -> FeatureMatrix {
        let win = self.win_length;
        let frames = onset.len();
        let mut rows = FeatureMatrix::with_capacity(win, frames);
        if frames == 0 {
            return rows;
        }
        let padded = pad_linear_ramp(onset, win / 2);
        let fft_len = 2 * win;
        let mut buffer = vec![Complex::<f32>::default(); fft_len];
        let mut scratch = vec![
            Complex::<f32>::default();
            self.forward
                .get_inplace_scratch_len()
                .max(self.inverse.get_inplace_scratch_len())
        ];
        let mut lags = vec![0.0_f32; win];
        for start in 0..frames {
            for (i, cell) in buffer.iter_mut().enumerate() {
                let value = if i < win {
                    padded[start + i] * self.window[i]
                } else {
                    0.0
                };
                *cell = Complex::new(value, 0.0);
            }
            self.forward.process_with_scratch(&mut buffer, &mut scratch);
            for cell in buffer.iter_mut() {
                *cell = Complex::new(cell.norm_sqr(), 0.0);
            }
            self.inverse.process_with_scratch(&mut buffer, &mut scratch);
            for (lag, slot) in lags.iter_mut().enumerate() {
                *slot = buffer[lag].re / fft_len as f32;
            }
            let peak = lags.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
            let divisor = if peak < AUTOCORR_FLOOR { 1.0 } else { peak };
            for slot in lags.iter_mut() {
                *slot /= divisor;
            }
            rows.push_row(&lags);
        }
        rows
    }

    /// Time-averaged autocorrelation tempogram with `win_length` lags.
    pub fn mean_tempogram(&self, onset: &[f32]) -> Vec<f32> {
        let win = self.win_length;
        let rows = self.tempogram(onset);
        if rows.is_empty() {
            return vec![0.0; win];
        }
        let mut mean = vec![0.0_f64; win];
        for row in rows.rows() {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += *value as f64;
            }
        }
        let frames = rows.frames() as f64;
        mean.iter().map(|sum| (sum / frames) as f32).collect()
    }

    fn pick_tempo(&self, curve: &[f32]) -> (f32, f32) {
        let to_lag = |bpm: f32| 60.0 * self.frame_rate / bpm;
        let lo = (to_lag(self.max_bpm).ceil() as usize).max(1);
        let hi = (to_lag(self.min_bpm).floor() as usize).min(curve.len().saturating_sub(2));
        if lo > hi {
            return (0.0, 0.0);
        }
        let range = &curve[lo..=hi];
        let Some((offset, peak)) = range
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return (0.0, 0.0);
        };
        if peak <= 0.0 {
            return (0.0, 0.0);
        }
        let lag = lo + offset;
        let refined = lag as f32 + parabolic_offset(curve[lag - 1], peak, curve[lag + 1]);
        let bpm = 60.0 * self.frame_rate / refined;
        let mean = range.iter().map(|v| *v as f64).sum::<f64>() / range.len() as f64;
        let confidence = ((peak as f64 - mean) / (peak as f64 + 1e-9)).clamp(0.0, 1.0) as f32;
        (bpm, confidence)
    }
}

/// Spectral-flux onset envelope: mean positive rise across bands per frame.
pub fn onset_strength(log_mel: &FeatureMatrix) -> Vec<f32> {
    let mut onset = Vec::with_capacity(log_mel.frames());
    let mut previous: Option<&[f32]> = None;
    for row in log_mel.rows() {
        let value = match previous {
            None => 0.0,
            Some(prev) => {
                let rise: f64 = row
                    .iter()
                    .zip(prev)
                    .map(|(cur, old)| (cur - old).max(0.0) as f64)
                    .sum();
                (rise / row.len().max(1) as f64) as f32
            }
        };
        onset.push(value);
        previous = Some(row);
    }
    onset
}

fn pad_linear_ramp(values: &[f32], pad: usize) -> Vec<f32> {
    let first = values.first().copied().unwrap_or(0.0);
    let last = values.last().copied().unwrap_or(0.0);
    let mut out = Vec::with_capacity(values.len() + 2 * pad);
    out.extend((0..pad).map(|i| first * i as f32 / pad as f32));
    out.extend_from_slice(values);
    out.extend((0..pad).map(|j| last * (pad - 1 - j) as f32 / pad as f32));
    out
}

fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}
