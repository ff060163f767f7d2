//! Short-time spectra and log-mel rows.

mod mel;

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};

use super::frames::{Frame, FrameError, FrameSegmenter, FrameSpec, Frames};
use super::matrix::FeatureMatrix;
use crate::config::LogMelConfig;

pub use mel::{MelFilterbank, MelNorm, MelScale};

/// Whether spectra hold `|X|` or `|X|^2`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumScale {
    Magnitude,
    #[default]
    Power,
}

/// Log compression applied to mel energies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogScale {
    /// `10 * log10(x + eps)`
    #[default]
    Decibel,
    /// `ln(x + eps)`
    Natural,
}

/// Spectrum of one frame, bins `0..=fft_len / 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralFrame {
    bins: Vec<f32>,
}

impl SpectralFrame {
    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Windowed FFT over a [`FrameSegmenter`].
#[derive(Clone)]
pub struct SpectralEngine {
    segmenter: FrameSegmenter,
    fft: Arc<dyn Fft<f32>>,
    scale: SpectrumScale,
}

impl SpectralEngine {
    pub fn new(spec: FrameSpec, scale: SpectrumScale) -> Result<Self, FrameError> {
        let segmenter = FrameSegmenter::new(spec)?;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(spec.fft_len);
        Ok(Self {
            segmenter,
            fft,
            scale,
        })
    }

    pub fn fft_len(&self) -> usize {
        self.segmenter.spec().fft_len
    }

    pub fn hop(&self) -> usize {
        self.segmenter.spec().hop
    }

    /// Bins per spectrum: `fft_len / 2 + 1`.
    pub fn bin_count(&self) -> usize {
        self.fft_len() / 2 + 1
    }

    pub fn frame_count(&self, len: usize) -> usize {
        self.segmenter.frame_count(len)
    }

    /// Transform a single frame.
    pub fn spectrum(&self, frame: &Frame) -> SpectralFrame {
        let mut buffer = vec![Complex::default(); self.fft_len()];
        let mut scratch = vec![Complex::default(); self.fft.get_inplace_scratch_len()];
        self.transform(&frame.samples, &mut buffer, &mut scratch)
    }

    /// Lazily compute the spectra of every frame in `pcm`.
    pub fn spectra<'a>(&'a self, pcm: &'a [f32]) -> Spectra<'a> {
        Spectra {
            engine: self,
            frames: self.segmenter.frames(pcm),
            buffer: vec![Complex::default(); self.fft_len()],
            scratch: vec![Complex::default(); self.fft.get_inplace_scratch_len()],
        }
    }

    fn transform(
        &self,
        samples: &[f32],
        buffer: &mut [Complex<f32>],
        scratch: &mut [Complex<f32>],
    ) -> SpectralFrame {
        for (cell, sample) in buffer.iter_mut().zip(samples.iter().copied()) {
            *cell = Complex::new(sample, 0.0);
        }
        self.fft.process_with_scratch(buffer, scratch);
        let bins = buffer[..self.bin_count()]
            .iter()
            .map(|c| {
                let power = c.re * c.re + c.im * c.im;
                match self.scale {
                    SpectrumScale::Power => power,
                    SpectrumScale::Magnitude => power.sqrt(),
                }
            })
            .collect();
        SpectralFrame { bins }
    }
}

/// Iterator returned by [`SpectralEngine::spectra`].
pub struct Spectra<'a> {
    engine: &'a SpectralEngine,
    frames: Frames<'a>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Iterator for Spectra<'_> {
    type Item = SpectralFrame;

    fn next(&mut self) -> Option<SpectralFrame> {
        let frame = self.frames.next()?;
        Some(
            self.engine
                .transform(&frame.samples, &mut self.buffer, &mut self.scratch),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

/// Log-mel spectrogram extractor.
#[derive(Clone)]
pub struct LogMelExtractor {
    engine: SpectralEngine,
    filterbank: MelFilterbank,
    log: LogScale,
    epsilon: f32,
    top_db: Option<f32>,
}

impl LogMelExtractor {
    pub fn new(sample_rate: u32, config: &LogMelConfig) -> Result<Self, FrameError> {
        let spec = FrameSpec::new(config.n_fft, config.hop_samples(sample_rate))
            .with_window_len(config.window_len.unwrap_or(config.n_fft))
            .with_window(config.window)
            .centered(config.center)
            .with_trailing(config.trailing);
        let engine = SpectralEngine::new(spec, config.spectrum)?;
        let filterbank = MelFilterbank::new(
            sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            config.fmax.unwrap_or(sample_rate as f32 / 2.0),
            config.mel_scale,
            config.norm,
        );
        Ok(Self {
            engine,
            filterbank,
            log: config.log,
            epsilon: config.epsilon,
            top_db: config.top_db,
        })
    }

    pub fn engine(&self) -> &SpectralEngine {
        &self.engine
    }

    pub fn n_mels(&self) -> usize {
        self.filterbank.bands()
    }

    /// Project one spectrum through the filterbank and log-compress it.
    pub fn row(&self, spectrum: &SpectralFrame) -> Vec<f32> {
        let mut energies = self.filterbank.apply(spectrum.bins());
        for value in &mut energies {
            *value = self.compress(*value);
        }
        energies
    }

    /// Compute the `[frames][n_mels]` log-mel matrix for `pcm`.
    pub fn extract(&self, pcm: &[f32]) -> FeatureMatrix {
        let mut matrix =
            FeatureMatrix::with_capacity(self.n_mels(), self.engine.frame_count(pcm.len()));
        for spectrum in self.engine.spectra(pcm) {
            matrix.push_row(&self.row(&spectrum));
        }
        if let Some(top_db) = self.top_db {
            self.clamp_top_db(&mut matrix, top_db);
        }
        matrix
    }

    fn compress(&self, energy: f32) -> f32 {
        let value = energy.max(0.0) + self.epsilon;
        match self.log {
            LogScale::Decibel => 10.0 * value.log10(),
            LogScale::Natural => value.ln(),
        }
    }

    fn clamp_top_db(&self, matrix: &mut FeatureMatrix, top_db: f32) {
        let range = match self.log {
            LogScale::Decibel => top_db,
            LogScale::Natural => top_db * std::f32::consts::LN_10 / 10.0,
        };
        let peak = matrix
            .as_slice()
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if !peak.is_finite() {
            return;
        }
        let floor = peak - range.abs();
        for value in matrix.as_mut_slice() {
            *value = value.max(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn spectrum_has_half_plus_one_bins() {
        let engine = SpectralEngine::new(FrameSpec::new(512, 256), SpectrumScale::Power).unwrap();
        let pcm = vec![0.0_f32; 2048];
        let frames: Vec<SpectralFrame> = engine.spectra(&pcm).collect();
        assert_eq!(frames.len(), 7);
        assert!(frames.iter().all(|frame| frame.len() == 257));
    }

    #[test]
    fn tone_peaks_in_expected_bin() {
        let rate = 8_000;
        let engine =
            SpectralEngine::new(FrameSpec::new(1024, 512), SpectrumScale::Magnitude).unwrap();
        let pcm = tone(1_000.0, rate, 4096);
        let spectrum = engine.spectra(&pcm).next().unwrap();
        let peak = spectrum
            .bins()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap();
        assert_eq!(peak, 128);
    }

    #[test]
    fn single_frame_matches_streamed_spectrum() {
        let engine = SpectralEngine::new(FrameSpec::new(256, 128), SpectrumScale::Power).unwrap();
        let pcm = tone(440.0, 8_000, 1024);
        let segmenter = FrameSegmenter::new(FrameSpec::new(256, 128)).unwrap();
        let frame = segmenter.frames(&pcm).nth(2).unwrap();
        let direct = engine.spectrum(&frame);
        let streamed = engine.spectra(&pcm).nth(2).unwrap();
        assert_eq!(direct, streamed);
    }

    #[test]
    fn silence_maps_to_log_floor() {
        let config = LogMelConfig::default();
        let extractor = LogMelExtractor::new(44_100, &config).unwrap();
        let matrix = extractor.extract(&vec![0.0_f32; 44_100]);
        assert_eq!(matrix.features(), 128);
        assert_eq!(matrix.frames(), 1 + 44_100 / 1102);
        assert!(matrix.as_slice().iter().all(|v| (*v + 100.0).abs() < 1e-3));
    }

    #[test]
    fn top_db_limits_dynamic_range() {
        let config = LogMelConfig {
            top_db: Some(80.0),
            ..LogMelConfig::default()
        };
        let extractor = LogMelExtractor::new(22_050, &config).unwrap();
        let matrix = extractor.extract(&tone(440.0, 22_050, 22_050));
        let max = matrix.as_slice().iter().copied().fold(f32::MIN, f32::max);
        let min = matrix.as_slice().iter().copied().fold(f32::MAX, f32::min);
        assert!(max - min <= 80.0 + 1e-3);
    }
}
