//! Client for the reference server that scores our vectors against its own.

mod dto;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use dto::{
    BaseResponse, EmbeddingCompareRequest, FeatureCompareRequest, RemoteDimensionError,
    RemoteSimilarity, SimilarityResponse,
};

use crate::analysis::embedding::EmbeddingVector;
use crate::analysis::features::FeatureKind;
use crate::analysis::similarity::{DimensionMismatch, SimilarityReport};
use crate::config::ParityConfig;
use crate::http_client;

const MAX_RESPONSE_BYTES: usize = 256 * 1024;
const EMBEDDING_COMPARE_PATH: &str = "embeddingCompare";
const FEATURE_COMPARE_PATH: &str = "cosineSimilarity";

#[derive(Debug, Error)]
pub enum ParityError {
    /// The server rejected the vector length.
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("HTTP error: {0}")]
    Transport(String),
    #[error("Server returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("Failed to read response: {0}")]
    Body(String),
    #[error("Invalid response JSON: {0}")]
    Json(String),
    #[error("Response had neither result nor error (status {status}: {message})")]
    MissingResult { status: String, message: String },
}

/// Blocking client for the parity endpoints.
#[derive(Clone)]
pub struct ParityClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ParityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            agent: http_client::agent(timeout),
        }
    }

    pub fn from_config(config: &ParityConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs.max(1)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the server to compare `embedding` with its own for the same audio.
    pub fn compare_embedding(
        &self,
        embedding: &EmbeddingVector,
    ) -> Result<SimilarityReport, ParityError> {
        let request = EmbeddingCompareRequest {
            app_embedding: embedding.as_slice(),
        };
        self.post(EMBEDDING_COMPARE_PATH, &request)
    }

    /// Ask the server to compare one flattened feature family.
    pub fn compare_feature(
        &self,
        kind: FeatureKind,
        feature: &[f32],
    ) -> Result<SimilarityReport, ParityError> {
        let request = FeatureCompareRequest {
            app_feature: feature,
            kind,
        };
        self.post(FEATURE_COMPARE_PATH, &request)
    }

    fn post(&self, path: &str, body: &impl Serialize) -> Result<SimilarityReport, ParityError> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!("POST {url}");
        let request = self
            .agent
            .post(&url)
            .set("Accept", "application/json")
            .set("Content-Type", "application/json");
        let (code, response) = match request.send_json(body) {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(code, response)) => (code, response),
            Err(ureq::Error::Transport(err)) => {
                return Err(ParityError::Transport(err.to_string()));
            }
        };
        let bytes = http_client::read_response_bytes(response, MAX_RESPONSE_BYTES)
            .map_err(|err| ParityError::Body(err.to_string()))?;
        let report = parse_similarity_response(code, &bytes)?;
        tracing::info!(
            "Server similarity for {path}: {:.6} (above threshold: {})",
            report.cosine_similarity,
            report.is_above_threshold
        );
        Ok(report)
    }
}

/// Decode an envelope; error statuses without one become [`ParityError::Status`].
fn parse_similarity_response(code: u16, bytes: &[u8]) -> Result<SimilarityReport, ParityError> {
    let parsed = serde_json::from_slice::<SimilarityResponse>(bytes);
    let response = match parsed {
        Ok(response) => response,
        Err(err) if (200..300).contains(&code) => return Err(ParityError::Json(err.to_string())),
        Err(_) => {
            return Err(ParityError::Status {
                code,
                body: String::from_utf8_lossy(bytes).trim().to_string(),
            });
        }
    };
    if let Some(error) = response.error {
        return Err(ParityError::DimensionMismatch(error.into()));
    }
    match response.result {
        Some(result) => Ok(result.into()),
        None if !(200..300).contains(&code) => Err(ParityError::Status {
            code,
            body: response.message,
        }),
        None => Err(ParityError::MissingResult {
            status: response.status,
            message: response.message,
        }),
    }
}
