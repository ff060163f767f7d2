//! Audio embedding pipeline: decode, extract log-mel, chroma and tempo
//! features, run the embedding model and score similarity.

/// Feature extraction, embedding inference and similarity.
pub mod analysis;
/// Application directory resolution.
pub mod app_dirs;
/// Pipeline configuration stored as TOML.
pub mod config;
/// Top-level pipeline error.
pub mod error;
pub(crate) mod http_client;
/// Tracing setup for the binaries.
pub mod logging;
/// Reference-server parity client.
pub mod parity;
/// End-to-end entry points.
pub mod pipeline;

pub use analysis::embedding::{EmbeddingBackend, EmbeddingVector};
pub use analysis::features::FeatureKind;
pub use analysis::similarity::{SimilarityReport, SimilarityVerifier};
pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError};
pub use pipeline::{Pipeline, extract_feature, run_full_pipeline};
