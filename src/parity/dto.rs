use serde::{Deserialize, Deserializer, Serialize};

use crate::analysis::features::FeatureKind;
use crate::analysis::similarity::{DimensionMismatch, SimilarityReport};

/// Body of `POST /embeddingCompare`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingCompareRequest<'a> {
    pub app_embedding: &'a [f32],
}

/// Body of `POST /cosineSimilarity`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCompareRequest<'a> {
    pub app_feature: &'a [f32],
    #[serde(rename = "type")]
    pub kind: FeatureKind,
}

/// Envelope shared by every reference-server response.
///
/// `status` is a word such as `"success"`; numeric codes are kept as text.
#[derive(Clone, Debug, Deserialize)]
pub struct BaseResponse<T, E> {
    #[serde(default, deserialize_with = "status_text")]
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub result: Option<T>,
    pub error: Option<E>,
}

fn status_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Status {
        Text(String),
        Code(i64),
    }
    Ok(match Option::<Status>::deserialize(deserializer)? {
        Some(Status::Text(text)) => text,
        Some(Status::Code(code)) => code.to_string(),
        None => String::new(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSimilarity {
    pub cosine_similarity: f64,
    pub is_above_threshold: bool,
}

impl From<RemoteSimilarity> for SimilarityReport {
    fn from(remote: RemoteSimilarity) -> Self {
        Self {
            cosine_similarity: remote.cosine_similarity,
            is_above_threshold: remote.is_above_threshold,
            degenerate: false,
        }
    }
}

/// Server-side dimension check failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct RemoteDimensionError {
    pub app_dim: usize,
    pub server_dim: usize,
}

impl From<RemoteDimensionError> for DimensionMismatch {
    fn from(remote: RemoteDimensionError) -> Self {
        Self {
            local_dim: remote.app_dim,
            remote_dim: remote.server_dim,
        }
    }
}

pub type SimilarityResponse = BaseResponse<RemoteSimilarity, RemoteDimensionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_request_uses_wire_names() {
        let body = serde_json::to_value(FeatureCompareRequest {
            app_feature: &[0.5, 1.0],
            kind: FeatureKind::Chroma,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"appFeature": [0.5, 1.0], "type": "C"}));
        let body = serde_json::to_value(EmbeddingCompareRequest {
            app_embedding: &[0.25],
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"appEmbedding": [0.25]}));
    }

    #[test]
    fn error_envelope_decodes_dimensions() {
        let response: SimilarityResponse = serde_json::from_str(
            r#"{"status":"fail","message":"dimension mismatch","result":null,"error":{"app_dim":128,"server_dim":96}}"#,
        )
        .unwrap();
        assert_eq!(response.status, "fail");
        assert!(response.result.is_none());
        let mismatch = DimensionMismatch::from(response.error.unwrap());
        assert_eq!(mismatch.local_dim, 128);
        assert_eq!(mismatch.remote_dim, 96);
    }

    #[test]
    fn success_envelope_with_text_status_decodes() {
        let response: SimilarityResponse = serde_json::from_str(
            r#"{"status":"success","message":"ok","result":{"cosineSimilarity":0.9,"isAboveThreshold":true},"error":null}"#,
        )
        .unwrap();
        assert_eq!(response.status, "success");
        assert!(response.error.is_none());
        let report = SimilarityReport::from(response.result.unwrap());
        assert_eq!(report.cosine_similarity, 0.9);
        assert!(report.is_above_threshold);
    }

    #[test]
    fn numeric_status_and_missing_fields_are_tolerated() {
        let response: SimilarityResponse =
            serde_json::from_str(r#"{"status":200,"message":"empty"}"#).unwrap();
        assert_eq!(response.status, "200");
        assert!(response.result.is_none());
        assert!(response.error.is_none());

        let response: SimilarityResponse = serde_json::from_str(r#"{"status":null}"#).unwrap();
        assert!(response.status.is_empty());
    }
}
