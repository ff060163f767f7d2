use std::fmt;
use std::str::FromStr;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::audio::PcmBuffer;
use super::chroma::ChromaExtractor;
use super::frames::FrameError;
use super::hpss::HpssSeparator;
use super::matrix::FeatureMatrix;
use super::spectral::LogMelExtractor;
use super::tempo::{TempoEstimator, TempoFeatures};
use crate::config::PipelineConfig;

/// Feature family selectable by tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    #[serde(rename = "L")]
    LogMel,
    #[serde(rename = "C")]
    Chroma,
    #[serde(rename = "T")]
    Tempo,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [FeatureKind::LogMel, FeatureKind::Chroma, FeatureKind::Tempo];

    /// Single-letter wire tag.
    pub fn tag(self) -> &'static str {
        match self {
            FeatureKind::LogMel => "L",
            FeatureKind::Chroma => "C",
            FeatureKind::Tempo => "T",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::LogMel => "logmel",
            FeatureKind::Chroma => "chroma",
            FeatureKind::Tempo => "tempo",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag that names no feature family.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Unknown feature kind {0:?}; expected L, C or T")]
pub struct UnknownFeatureKind(pub String);

impl FromStr for FeatureKind {
    type Err = UnknownFeatureKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "l" | "logmel" | "log_mel" | "mel" => Ok(FeatureKind::LogMel),
            "c" | "chroma" => Ok(FeatureKind::Chroma),
            "t" | "tempo" => Ok(FeatureKind::Tempo),
            _ => Err(UnknownFeatureKind(value.to_string())),
        }
    }
}

/// Features of one song excerpt.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentFeatures {
    pub log_mel: FeatureMatrix,
    pub chroma: FeatureMatrix,
    pub tempo: TempoFeatures,
}

impl SegmentFeatures {
    /// Flatten one family: matrices band-major, tempo as its tempogram.
    pub fn flatten(&self, kind: FeatureKind) -> Vec<f32> {
        match kind {
            FeatureKind::LogMel => self.log_mel.to_feature_major(),
            FeatureKind::Chroma => self.chroma.to_feature_major(),
            FeatureKind::Tempo => self.tempo.tempogram.clone(),
        }
    }
}

/// Runs the log-mel, chroma and tempo stages over an excerpt.
///
/// With a separator configured, chroma reads the harmonic half and tempo
/// the log-mel of the percussive half.
#[derive(Clone)]
pub struct FeatureExtractor {
    log_mel: LogMelExtractor,
    chroma: ChromaExtractor,
    tempo: TempoEstimator,
    hpss: Option<HpssSeparator>,
}

impl FeatureExtractor {
    pub fn new(config: &PipelineConfig) -> Result<Self, FrameError> {
        let sample_rate = config.audio.target_sample_rate;
        let log_mel = LogMelExtractor::new(sample_rate, &config.logmel)?;
        let chroma = ChromaExtractor::new(sample_rate, &config.chroma)?;
        let tempo = TempoEstimator::new(sample_rate, log_mel.engine().hop(), &config.tempo);
        let hpss = config
            .hpss
            .enabled
            .then(|| HpssSeparator::new(&config.hpss));
        Ok(Self {
            log_mel,
            chroma,
            tempo,
            hpss,
        })
    }

    pub fn log_mel(&self) -> &LogMelExtractor {
        &self.log_mel
    }

    pub fn chroma(&self) -> &ChromaExtractor {
        &self.chroma
    }

    pub fn tempo(&self) -> &TempoEstimator {
        &self.tempo
    }

    pub fn hpss(&self) -> Option<&HpssSeparator> {
        self.hpss.as_ref()
    }

    /// Extract every family; chroma runs alongside log-mel and tempo.
    pub fn extract(&self, pcm: &PcmBuffer) -> SegmentFeatures {
        let samples = pcm.samples();
        let separated = self.hpss.as_ref().map(|hpss| hpss.separate(samples));
        let (harmonic, percussive) = match &separated {
            Some(split) => (split.harmonic.as_slice(), split.percussive.as_slice()),
            None => (samples, samples),
        };
        let (log_mel, tempo, chroma) = thread::scope(|scope| {
            let chroma = scope.spawn(|| self.chroma.extract(harmonic));
            let log_mel = self.log_mel.extract(samples);
            let tempo = if separated.is_some() {
                self.tempo.estimate(&self.log_mel.extract(percussive))
            } else {
                self.tempo.estimate(&log_mel)
            };
            let chroma = chroma
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
            (log_mel, tempo, chroma)
        });
        tracing::debug!(
            "Excerpt features: log-mel {}x{}, chroma {}x{}, tempo {:.1} BPM",
            log_mel.frames(),
            log_mel.features(),
            chroma.frames(),
            chroma.features(),
            tempo.bpm
        );
        SegmentFeatures {
            log_mel,
            chroma,
            tempo,
        }
    }

    /// Compute only what `kind` needs and flatten it.
    pub fn extract_kind(&self, pcm: &PcmBuffer, kind: FeatureKind) -> Vec<f32> {
        let samples = pcm.samples();
        match (kind, &self.hpss) {
            (FeatureKind::LogMel, _) => self.log_mel.extract(samples).to_feature_major(),
            (FeatureKind::Chroma, None) => self.chroma.extract(samples).to_feature_major(),
            (FeatureKind::Chroma, Some(hpss)) => self
                .chroma
                .extract(&hpss.separate(samples).harmonic)
                .to_feature_major(),
            (FeatureKind::Tempo, None) => {
                self.tempo.estimate(&self.log_mel.extract(samples)).tempogram
            }
            (FeatureKind::Tempo, Some(hpss)) => {
                let percussive = hpss.separate(samples).percussive;
                self.tempo.estimate(&self.log_mel.extract(&percussive)).tempogram
            }
        }
    }
}
