//! Top-level error returned by the pipeline entry points.

use thiserror::Error;

use crate::analysis::audio::DecodeError;
use crate::analysis::embedding::{InferenceError, ModelLoadError, ShapeMismatchError};
use crate::analysis::features::UnknownFeatureKind;
use crate::analysis::frames::FrameError;
use crate::analysis::similarity::DimensionMismatch;
use crate::config::ConfigError;
use crate::parity::ParityError;

/// Broad cause of a [`PipelineError`], for callers that react by category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input audio or vectors are unusable.
    Data,
    /// Settings disagree with each other or with the model.
    Configuration,
    /// The model, runtime or network failed.
    Environment,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Vector length mismatch: local {local_dim}, remote {remote_dim}")]
    DimensionMismatch { local_dim: usize, remote_dim: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid feature kind {0:?}; expected L, C or T")]
    InvalidFeatureKind(String),
    #[error("Parity request failed: {0}")]
    Parity(ParityError),
    #[error("Invalid framing parameters: {0}")]
    Segmentation(#[from] FrameError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) | Self::DimensionMismatch { .. } | Self::InvalidFeatureKind(_) => {
                ErrorKind::Data
            }
            Self::ShapeMismatch(_) | Self::Config(_) | Self::Segmentation(_) => {
                ErrorKind::Configuration
            }
            Self::ModelLoad(_) | Self::Inference(_) | Self::Parity(_) => ErrorKind::Environment,
        }
    }
}

impl From<DimensionMismatch> for PipelineError {
    fn from(err: DimensionMismatch) -> Self {
        Self::DimensionMismatch {
            local_dim: err.local_dim,
            remote_dim: err.remote_dim,
        }
    }
}

impl From<UnknownFeatureKind> for PipelineError {
    fn from(err: UnknownFeatureKind) -> Self {
        Self::InvalidFeatureKind(err.0)
    }
}

impl From<ParityError> for PipelineError {
    fn from(err: ParityError) -> Self {
        match err {
            ParityError::DimensionMismatch(mismatch) => mismatch.into(),
            other => Self::Parity(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_not_collapsed() {
        let data: PipelineError = DimensionMismatch {
            local_dim: 128,
            remote_dim: 96,
        }
        .into();
        assert_eq!(data.kind(), ErrorKind::Data);

        let config: PipelineError = ShapeMismatchError::EmptyBatch.into();
        assert_eq!(config.kind(), ErrorKind::Configuration);

        let env: PipelineError = InferenceError::EmptyOutput.into();
        assert_eq!(env.kind(), ErrorKind::Environment);

        let invalid: PipelineError = "X".parse::<crate::analysis::features::FeatureKind>()
            .unwrap_err()
            .into();
        assert!(matches!(invalid, PipelineError::InvalidFeatureKind(ref tag) if tag == "X"));
        assert_eq!(invalid.kind(), ErrorKind::Data);
    }

    #[test]
    fn server_dimension_error_surfaces_as_mismatch() {
        let err: PipelineError = ParityError::DimensionMismatch(DimensionMismatch {
            local_dim: 128,
            remote_dim: 96,
        })
        .into();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                local_dim: 128,
                remote_dim: 96
            }
        ));
        let transport: PipelineError = ParityError::Transport("refused".into()).into();
        assert_eq!(transport.kind(), ErrorKind::Environment);
    }
}
