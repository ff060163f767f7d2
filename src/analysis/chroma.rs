//! Pitch-class energy profiles.

use serde::{Deserialize, Serialize};

use super::frames::{FrameError, FrameSpec};
use super::matrix::FeatureMatrix;
use super::spectral::{SpectralEngine, SpectralFrame};
use crate::config::ChromaConfig;

/// Number of pitch classes, indexed from C.
pub const PITCH_CLASSES: usize = 12;

const A4_HZ: f64 = 440.0;
const A4_MIDI: f64 = 69.0;
const MIN_GAUSSIAN_WEIGHT: f64 = 0.01;
const NORM_FLOOR: f32 = 1e-9;

/// How a spectrum bin's energy is folded into pitch classes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChromaMapping {
    /// All energy goes to `round(midi) mod 12`.
    Nearest,
    /// Energy is spread over neighbouring classes by pitch distance.
    Gaussian { width: f32 },
}

impl Default for ChromaMapping {
    fn default() -> Self {
        Self::Nearest
    }
}

/// Folds spectra into 12-bin chroma vectors.
#[derive(Clone)]
pub struct ChromaExtractor {
    engine: SpectralEngine,
    bin_weights: Vec<Vec<(usize, f32)>>,
}

impl ChromaExtractor {
    pub fn new(sample_rate: u32, config: &ChromaConfig) -> Result<Self, FrameError> {
        let spec = FrameSpec::new(config.n_fft, config.hop)
            .with_window(config.window)
            .centered(config.center);
        let engine = SpectralEngine::new(spec, config.spectrum)?;
        let bin_weights = (0..engine.bin_count())
            .map(|bin| {
                let freq = bin as f64 * sample_rate as f64 / config.n_fft as f64;
                if freq <= 0.0 || freq < config.min_hz as f64 || freq > config.max_hz as f64 {
                    return Vec::new();
                }
                pitch_class_weights(hz_to_midi(freq), config.mapping)
            })
            .collect();
        Ok(Self {
            engine,
            bin_weights,
        })
    }

    pub fn engine(&self) -> &SpectralEngine {
        &self.engine
    }

    /// Chroma vector for one spectrum, max-normalized.
    pub fn row(&self, spectrum: &SpectralFrame) -> [f32; PITCH_CLASSES] {
        let mut sums = [0.0_f64; PITCH_CLASSES];
        for (value, weights) in spectrum.bins().iter().zip(&self.bin_weights) {
            for &(class, weight) in weights {
                sums[class] += *value as f64 * weight as f64;
            }
        }
        let mut row = sums.map(|sum| sum as f32);
        let peak = row.iter().copied().fold(0.0_f32, f32::max);
        let divisor = if peak < NORM_FLOOR { 1.0 } else { peak };
        for value in &mut row {
            *value /= divisor;
        }
        row
    }

    /// Compute the `[frames][12]` chroma matrix for `pcm`.
    pub fn extract(&self, pcm: &[f32]) -> FeatureMatrix {
        let mut matrix =
            FeatureMatrix::with_capacity(PITCH_CLASSES, self.engine.frame_count(pcm.len()));
        for spectrum in self.engine.spectra(pcm) {
            matrix.push_row(&self.row(&spectrum));
        }
        matrix
    }
}

pub(crate) fn hz_to_midi(freq: f64) -> f64 {
    A4_MIDI + 12.0 * (freq / A4_HZ).log2()
}

fn pitch_class_weights(midi: f64, mapping: ChromaMapping) -> Vec<(usize, f32)> {
    match mapping {
        ChromaMapping::Nearest => {
            let class = (midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize;
            vec![(class, 1.0)]
        }
        ChromaMapping::Gaussian { width } => {
            let width = (width as f64).max(1e-3);
            (0..PITCH_CLASSES)
                .filter_map(|class| {
                    let mut dist = (midi - class as f64).rem_euclid(12.0);
                    if dist > 6.0 {
                        dist -= 12.0;
                    }
                    let weight = (-0.5 * (dist / width).powi(2)).exp();
                    (weight > MIN_GAUSSIAN_WEIGHT).then_some((class, weight as f32))
                })
                .collect()
        }
    }
}
