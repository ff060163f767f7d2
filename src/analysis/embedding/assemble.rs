use ndarray::{Array2, Array3, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ModelContract;
use crate::analysis::features::SegmentFeatures;
use crate::analysis::matrix::FeatureMatrix;

const NORM_STD_FLOOR: f64 = 1e-8;

/// Which frames survive when a sequence is longer than the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationSide {
    /// Keep the first frames.
    #[default]
    Head,
    /// Keep the last frames.
    Tail,
    /// Keep the middle frames.
    Center,
}

/// Where zeros go when a sequence is shorter than the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingSide {
    /// Zeros after the real frames.
    #[default]
    Post,
    /// Zeros before the real frames.
    Pre,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureNormalization {
    #[default]
    None,
    /// Zero mean, unit variance per band over the real frames.
    PerBand,
}

/// Fixed-length policy for time-varying features.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyPolicy {
    pub truncation: TruncationSide,
    pub padding: PaddingSide,
    pub normalization: FeatureNormalization,
}

/// Assembled tensors disagree with the model contract.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShapeMismatchError {
    #[error("{tensor} tensor expects {expected} {axis}, got {actual}")]
    Axis {
        tensor: &'static str,
        axis: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Model input batch is empty")]
    EmptyBatch,
}

/// Tensors fed to the embedding model, batch-first.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInput {
    /// `[batch, n_mels, frames]`
    pub mel: Array3<f32>,
    /// `[batch, chroma_bins, frames]`
    pub chroma: Array3<f32>,
    /// `[batch, tempo_len]`
    pub tempo: Array2<f32>,
}

impl ModelInput {
    pub fn batch_size(&self) -> usize {
        self.mel.len_of(Axis(0))
    }
}

/// Stacks per-excerpt features into [`ModelInput`] tensors.
#[derive(Clone, Debug)]
pub struct FeatureAssembler {
    contract: ModelContract,
    policy: AssemblyPolicy,
}

impl FeatureAssembler {
    pub fn new(contract: ModelContract, policy: AssemblyPolicy) -> Self {
        Self { contract, policy }
    }

    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    /// Check every excerpt against the contract, then fit and stack them.
    pub fn assemble(&self, segments: &[SegmentFeatures]) -> Result<ModelInput, ShapeMismatchError> {
        if segments.is_empty() {
            return Err(ShapeMismatchError::EmptyBatch);
        }
        for segment in segments {
            self.check(segment)?;
        }
        let batch = segments.len();
        let frames = self.contract.frames;
        let mut mel = Array3::<f32>::zeros((batch, self.contract.n_mels, frames));
        let mut chroma = Array3::<f32>::zeros((batch, self.contract.chroma_bins, frames));
        let mut tempo = Array2::<f32>::zeros((batch, self.contract.tempo_len));
        for (index, segment) in segments.iter().enumerate() {
            self.fit_into(&segment.log_mel, mel.index_axis_mut(Axis(0), index));
            self.fit_into(&segment.chroma, chroma.index_axis_mut(Axis(0), index));
            for (slot, value) in tempo
                .index_axis_mut(Axis(0), index)
                .iter_mut()
                .zip(&segment.tempo.tempogram)
            {
                *slot = *value;
            }
        }
        tracing::debug!(
            "Assembled model input: mel {:?}, chroma {:?}, tempo {:?}",
            mel.shape(),
            chroma.shape(),
            tempo.shape()
        );
        Ok(ModelInput { mel, chroma, tempo })
    }

    fn check(&self, segment: &SegmentFeatures) -> Result<(), ShapeMismatchError> {
        let checks = [
            ("mel", "bands", self.contract.n_mels, segment.log_mel.features()),
            ("chroma", "bins", self.contract.chroma_bins, segment.chroma.features()),
            ("tempo", "lags", self.contract.tempo_len, segment.tempo.tempogram.len()),
        ];
        for (tensor, axis, expected, actual) in checks {
            if expected != actual {
                return Err(ShapeMismatchError::Axis {
                    tensor,
                    axis,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Write `matrix` band-major into `out` (`[features, target]`).
    fn fit_into(&self, matrix: &FeatureMatrix, mut out: ArrayViewMut2<'_, f32>) {
        let target = out.len_of(Axis(1));
        let (source, dest, count) = fit_window(matrix.frames(), target, self.policy);
        for frame in 0..count {
            if let Some(row) = matrix.row(source + frame) {
                for (feature, value) in row.iter().enumerate() {
                    out[[feature, dest + frame]] = *value;
                }
            }
        }
        if self.policy.normalization == FeatureNormalization::PerBand {
            normalize_bands(&mut out, dest, count);
        }
    }
}

/// Returns `(first source frame, first destination frame, frame count)`.
fn fit_window(available: usize, target: usize, policy: AssemblyPolicy) -> (usize, usize, usize) {
    if available >= target {
        let excess = available - target;
        let source = match policy.truncation {
            TruncationSide::Head => 0,
            TruncationSide::Tail => excess,
            TruncationSide::Center => excess / 2,
        };
        (source, 0, target)
    } else {
        let dest = match policy.padding {
            PaddingSide::Post => 0,
            PaddingSide::Pre => target - available,
        };
        (0, dest, available)
    }
}

fn normalize_bands(out: &mut ArrayViewMut2<'_, f32>, start: usize, count: usize) {
    if count == 0 {
        return;
    }
    for mut band in out.axis_iter_mut(Axis(0)) {
        let real: Vec<f32> = band.iter().skip(start).take(count).copied().collect();
        let mean = real.iter().map(|v| *v as f64).sum::<f64>() / count as f64;
        let var = real
            .iter()
            .map(|v| (*v as f64 - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        let std = var.sqrt().max(NORM_STD_FLOOR);
        for value in band.iter_mut().skip(start).take(count) {
            *value = ((*value as f64 - mean) / std) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tempo::TempoFeatures;

    fn contract(frames: usize) -> ModelContract {
        ModelContract {
            n_mels: 2,
            chroma_bins: 12,
            tempo_len: 3,
            frames,
            embedding_dim: 4,
        }
    }

    fn segment(frames: usize) -> SegmentFeatures {
        let mel_rows: Vec<[f32; 2]> = (0..frames).map(|t| [t as f32 + 1.0, -(t as f32) - 1.0]).collect();
        let chroma_rows: Vec<[f32; 12]> = (0..frames).map(|_| [0.5; 12]).collect();
        SegmentFeatures {
            log_mel: FeatureMatrix::from_rows(2, &mel_rows),
            chroma: FeatureMatrix::from_rows(12, &chroma_rows),
            tempo: TempoFeatures {
                bpm: 120.0,
                confidence: 0.5,
                tempogram: vec![1.0, 0.5, 0.25],
            },
        }
    }

    #[test]
    fn short_excerpt_is_post_padded_band_major() {
        let assembler = FeatureAssembler::new(contract(4), AssemblyPolicy::default());
        let input = assembler.assemble(&[segment(2)]).unwrap();
        assert_eq!(input.mel.shape(), &[1, 2, 4]);
        assert_eq!(input.mel.index_axis(Axis(0), 0).row(0).to_vec(), vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(input.mel.index_axis(Axis(0), 0).row(1).to_vec(), vec![-1.0, -2.0, 0.0, 0.0]);
        assert_eq!(input.tempo.row(0).to_vec(), vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn pre_padding_moves_frames_to_the_end() {
        let policy = AssemblyPolicy {
            padding: PaddingSide::Pre,
            ..AssemblyPolicy::default()
        };
        let input = FeatureAssembler::new(contract(4), policy).assemble(&[segment(2)]).unwrap();
        assert_eq!(input.mel.index_axis(Axis(0), 0).row(0).to_vec(), vec![0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn truncation_sides_pick_expected_frames() {
        let cases = [
            (TruncationSide::Head, vec![1.0, 2.0, 3.0]),
            (TruncationSide::Tail, vec![4.0, 5.0, 6.0]),
            (TruncationSide::Center, vec![2.0, 3.0, 4.0]),
        ];
        for (truncation, expected) in cases {
            let policy = AssemblyPolicy {
                truncation,
                ..AssemblyPolicy::default()
            };
            let input = FeatureAssembler::new(contract(3), policy).assemble(&[segment(6)]).unwrap();
            assert_eq!(input.mel.index_axis(Axis(0), 0).row(0).to_vec(), expected, "{truncation:?}");
        }
    }

    #[test]
    fn batches_are_stacked_in_order() {
        let assembler = FeatureAssembler::new(contract(3), AssemblyPolicy::default());
        let input = assembler.assemble(&[segment(3), segment(1)]).unwrap();
        assert_eq!(input.batch_size(), 2);
        assert_eq!(input.chroma.shape(), &[2, 12, 3]);
        assert_eq!(input.chroma[[1, 0, 0]], 0.5);
        assert_eq!(input.chroma[[1, 0, 1]], 0.0);
    }

    #[test]
    fn band_count_mismatch_is_reported_before_inference() {
        let mut bad = contract(3);
        bad.n_mels = 64;
        let err = FeatureAssembler::new(bad, AssemblyPolicy::default())
            .assemble(&[segment(3)])
            .unwrap_err();
        assert_eq!(
            err,
            ShapeMismatchError::Axis {
                tensor: "mel",
                axis: "bands",
                expected: 64,
                actual: 2,
            }
        );
    }

    #[test]
    fn empty_batch_is_a_shape_mismatch() {
        let assembler = FeatureAssembler::new(contract(3), AssemblyPolicy::default());
        assert_eq!(assembler.assemble(&[]).unwrap_err(), ShapeMismatchError::EmptyBatch);
    }

    #[test]
    fn per_band_normalization_ignores_padding() {
        let policy = AssemblyPolicy {
            normalization: FeatureNormalization::PerBand,
            ..AssemblyPolicy::default()
        };
        let input = FeatureAssembler::new(contract(5), policy).assemble(&[segment(3)]).unwrap();
        let band = input.mel.index_axis(Axis(0), 0).row(0).to_vec();
        let real = &band[..3];
        let mean: f32 = real.iter().sum::<f32>() / 3.0;
        assert!(mean.abs() < 1e-6);
        assert_eq!(&band[3..], &[0.0, 0.0]);
        let constant = input.chroma.index_axis(Axis(0), 0).row(0).to_vec();
        assert!(constant.iter().all(|v| v.is_finite() && v.abs() < 1e-6));
    }
}
