//! Model-input assembly and embedding inference.

mod assemble;
mod backend;
mod infer;
mod model;

use serde::{Deserialize, Serialize};

pub use assemble::{
    AssemblyPolicy, FeatureAssembler, FeatureNormalization, ModelInput, PaddingSide,
    ShapeMismatchError, TruncationSide,
};
pub use backend::{EmbeddingBackend, InferenceError};
pub use infer::{EMBEDDING_EPS, embed, pool_embeddings};
pub use model::{
    ModelArtifact, ModelLoadError, ModelOptions, OnnxEmbeddingModel, TensorNames,
    reset_shared_model, shared_model, try_reset_shared_model,
};

use crate::config::PipelineConfig;

/// Default embedding width of the reference model.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Input/output dimensions the embedding model was exported with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelContract {
    pub n_mels: usize,
    pub chroma_bins: usize,
    pub tempo_len: usize,
    /// Time frames per excerpt in the mel and chroma tensors.
    pub frames: usize,
    pub embedding_dim: usize,
}

impl ModelContract {
    /// Derive the contract from configuration.
    ///
    /// Without an explicit frame count this is the number of centered log-mel
    /// frames in one full excerpt.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let sample_rate = config.audio.target_sample_rate;
        let frames = config.model.target_frames.unwrap_or_else(|| {
            let seg_len = (config.segments.segment_seconds as f64 * sample_rate as f64) as usize;
            1 + seg_len / config.logmel.hop_samples(sample_rate).max(1)
        });
        Self {
            n_mels: config.model.n_mels.unwrap_or(config.logmel.n_mels),
            chroma_bins: config.model.chroma_bins,
            tempo_len: config.model.tempo_len.unwrap_or(config.tempo.tempo_len),
            frames,
            embedding_dim: config.model.embedding_dim,
        }
    }
}

/// Fixed-length embedding of one recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Wrap pooled values; empty vectors are rejected.
    pub fn new(values: Vec<f32>) -> Result<Self, InferenceError> {
        if values.is_empty() {
            return Err(InferenceError::EmptyOutput);
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All components are zero, so no direction can be compared.
    pub fn is_degenerate(&self) -> bool {
        self.0.iter().all(|value| *value == 0.0)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl AsRef<[f32]> for EmbeddingVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contract_matches_reference_geometry() {
        let contract = ModelContract::from_config(&PipelineConfig::default());
        assert_eq!(contract.n_mels, 128);
        assert_eq!(contract.chroma_bins, 12);
        assert_eq!(contract.tempo_len, 160);
        assert_eq!(contract.frames, 745);
        assert_eq!(contract.embedding_dim, DEFAULT_EMBEDDING_DIM);
    }

    #[test]
    fn empty_embedding_is_rejected() {
        assert!(matches!(
            EmbeddingVector::new(Vec::new()),
            Err(InferenceError::EmptyOutput)
        ));
    }
}
