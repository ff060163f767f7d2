//! End-to-end wiring: audio file in, embedding or feature vector out.

use std::path::Path;
use std::sync::Arc;

use crate::analysis::audio::{AudioSource, PcmBuffer};
use crate::analysis::embedding::{
    self, EmbeddingBackend, EmbeddingVector, FeatureAssembler, ModelArtifact, ModelContract,
    ModelInput, ModelOptions, OnnxEmbeddingModel,
};
use crate::analysis::features::{FeatureExtractor, FeatureKind, SegmentFeatures};
use crate::analysis::segments::SegmentPlanner;
use crate::analysis::similarity::SimilarityVerifier;
use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Embed `audio` with the model at `model_path`, using default settings.
pub fn run_full_pipeline(audio: &Path, model_path: &Path) -> Result<EmbeddingVector, PipelineError> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let artifact = ModelArtifact::new(model_path, pipeline.config.model.data_file.as_deref());
    let model = pipeline.load_model(&artifact)?;
    pipeline.embed_with(audio, model.as_ref())
}

/// Flattened `kind` feature of every excerpt of `audio`, in excerpt order.
pub fn extract_feature(audio: &Path, kind: FeatureKind) -> Result<Vec<f32>, PipelineError> {
    Pipeline::new(PipelineConfig::default())?.extract_feature(audio, kind)
}

/// Configured pipeline; cheap to share between threads.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    source: AudioSource,
    planner: SegmentPlanner,
    extractor: FeatureExtractor,
    assembler: FeatureAssembler,
    verifier: SimilarityVerifier,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let config = config.normalized();
        let extractor = FeatureExtractor::new(&config)?;
        let assembler = FeatureAssembler::new(ModelContract::from_config(&config), config.assembly);
        Ok(Self {
            source: AudioSource::from_config(&config.audio),
            planner: SegmentPlanner::new(&config.segments),
            verifier: SimilarityVerifier::new(config.similarity.threshold),
            extractor,
            assembler,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn contract(&self) -> &ModelContract {
        self.assembler.contract()
    }

    pub fn verifier(&self) -> &SimilarityVerifier {
        &self.verifier
    }

    /// Decode `path` to mono PCM at the analysis rate.
    pub fn load(&self, path: &Path) -> Result<PcmBuffer, PipelineError> {
        let pcm = self.source.load(path)?;
        tracing::info!(
            "Decoded {}: {:.2}s at {} Hz",
            path.display(),
            pcm.duration_seconds(),
            pcm.sample_rate()
        );
        Ok(pcm)
    }

    /// Features of each planned excerpt, in signal order.
    pub fn segment_features(&self, pcm: &PcmBuffer) -> Vec<SegmentFeatures> {
        let ranges = self.planner.plan(pcm.len(), pcm.sample_rate());
        tracing::debug!("Planned {} excerpts over {} samples", ranges.len(), pcm.len());
        ranges
            .into_iter()
            .map(|range| self.extractor.extract(&pcm.slice(range)))
            .collect()
    }

    /// Flattened `kind` feature of every excerpt, concatenated.
    pub fn feature_from_pcm(&self, pcm: &PcmBuffer, kind: FeatureKind) -> Vec<f32> {
        self.planner
            .plan(pcm.len(), pcm.sample_rate())
            .into_iter()
            .flat_map(|range| self.extractor.extract_kind(&pcm.slice(range), kind))
            .collect()
    }

    pub fn extract_feature(&self, path: &Path, kind: FeatureKind) -> Result<Vec<f32>, PipelineError> {
        let pcm = self.load(path)?;
        Ok(self.feature_from_pcm(&pcm, kind))
    }

    /// Stack excerpt features into model tensors.
    pub fn assemble(&self, segments: &[SegmentFeatures]) -> Result<ModelInput, PipelineError> {
        Ok(self.assembler.assemble(segments)?)
    }

    pub fn embed_pcm(
        &self,
        pcm: &PcmBuffer,
        backend: &dyn EmbeddingBackend,
    ) -> Result<EmbeddingVector, PipelineError> {
        let segments = self.segment_features(pcm);
        let input = self.assemble(&segments)?;
        let vector = embedding::embed(backend, &input)?;
        tracing::info!(
            "Embedded {} excerpts into {} dimensions",
            input.batch_size(),
            vector.len()
        );
        Ok(vector)
    }

    /// Decode `path` and embed it with `backend`.
    pub fn embed_with(
        &self,
        path: &Path,
        backend: &dyn EmbeddingBackend,
    ) -> Result<EmbeddingVector, PipelineError> {
        let pcm = self.load(path)?;
        self.embed_pcm(&pcm, backend)
    }

    /// Decode `path` and embed it with the configured ONNX model.
    pub fn embed(&self, path: &Path) -> Result<EmbeddingVector, PipelineError> {
        let model = self.load_model(&self.model_artifact()?)?;
        self.embed_with(path, model.as_ref())
    }

    /// Model location from `RESONANCE_MODEL_PATH`, config or the app directory.
    pub fn model_artifact(&self) -> Result<ModelArtifact, PipelineError> {
        Ok(ModelArtifact::resolve(&self.config.model)?)
    }

    /// Process-wide model for `artifact`, loaded on first use.
    pub fn load_model(&self, artifact: &ModelArtifact) -> Result<Arc<OnnxEmbeddingModel>, PipelineError> {
        let options = ModelOptions::from_config(&self.config.model);
        Ok(embedding::shared_model(artifact, &options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn tone(seconds: f32) -> PcmBuffer {
        let rate = 44_100;
        let samples = (0..(seconds * rate as f32) as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5)
            .collect();
        PcmBuffer::mono(samples, rate)
    }

    #[test]
    fn long_signal_yields_capped_excerpts() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let segments = pipeline.segment_features(&tone(40.0));
        assert_eq!(segments.len(), 3);
        for segment in &segments {
            assert_eq!(segment.log_mel.frames(), 745);
            assert_eq!(segment.tempo.tempogram.len(), 160);
        }
    }

    #[test]
    fn feature_vector_concatenates_excerpts() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let pcm = tone(2.0);
        let chroma = pipeline.feature_from_pcm(&pcm, FeatureKind::Chroma);
        let segments = pipeline.segment_features(&pcm);
        assert_eq!(segments.len(), 1);
        assert_eq!(chroma, segments[0].flatten(FeatureKind::Chroma));
        assert_eq!(chroma.len() % 12, 0);
    }

    #[test]
    fn tiny_log_mel_hop_still_builds() {
        let mut config = PipelineConfig::default();
        config.logmel.hop_ms = 0.001;
        let pipeline = Pipeline::new(config).unwrap();
        assert_eq!(pipeline.config().logmel.hop_samples(44_100), 1);
    }

    #[test]
    fn missing_model_is_environment_error() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("absent.wav");
        let err = run_full_pipeline(&audio, &dir.path().join("model.onnx")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
        assert_eq!(err.kind(), ErrorKind::Environment);
    }

    #[test]
    fn missing_audio_is_decode_error() {
        let dir = tempdir().unwrap();
        let err = extract_feature(&dir.path().join("absent.mp3"), FeatureKind::Tempo).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(err.kind(), ErrorKind::Data);
    }
}
