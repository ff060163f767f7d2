//! Feature extraction: decoding, framing, spectra, separation, chroma and tempo.

pub mod audio;
pub mod chroma;
pub mod embedding;
pub mod features;
pub mod frames;
pub mod hpss;
pub mod matrix;
pub mod segments;
pub mod similarity;
pub mod spectral;
pub mod tempo;

pub use audio::{AudioSource, DecodeError, PcmBuffer};
pub use chroma::{ChromaExtractor, ChromaMapping, PITCH_CLASSES};
pub use features::{FeatureExtractor, FeatureKind, SegmentFeatures, UnknownFeatureKind};
pub use frames::{Frame, FrameError, FrameSegmenter, FrameSpec, TrailingPolicy, WindowKind};
pub use hpss::{HpssOutput, HpssSeparator};
pub use matrix::FeatureMatrix;
pub use segments::SegmentPlanner;
pub use spectral::{LogMelExtractor, LogScale, SpectralEngine, SpectralFrame, SpectrumScale};
pub use tempo::{TempoEstimator, TempoFeatures};
