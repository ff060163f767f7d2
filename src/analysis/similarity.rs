//! Cosine similarity between locally computed and reference vectors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::embedding::EmbeddingVector;
use super::features::FeatureKind;

/// Similarity at or above which two vectors count as the same recording.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// The two vectors have different lengths, so no similarity exists.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Vector length mismatch: local {local_dim}, remote {remote_dim}")]
pub struct DimensionMismatch {
    pub local_dim: usize,
    pub remote_dim: usize,
}

/// Outcome of comparing two equal-length vectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// In `[-1, 1]`.
    pub cosine_similarity: f64,
    pub is_above_threshold: bool,
    /// One of the vectors had zero norm; the similarity is reported as 0.
    pub degenerate: bool,
}

/// Cosine similarity with f64 accumulation.
///
/// Returns `None` when either vector has zero norm. Equal inputs give
/// exactly 1.0 and the result is symmetric.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<Option<f64>, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            local_dim: a.len(),
            remote_dim: b.len(),
        });
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if !denom.is_finite() || denom <= 0.0 {
        return Ok(None);
    }
    Ok(Some((dot / denom).clamp(-1.0, 1.0)))
}

/// Thresholded cosine comparison.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityVerifier {
    threshold: f64,
}

impl Default for SimilarityVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SimilarityVerifier {
    /// Non-finite thresholds fall back to the default; others are clamped to `[-1, 1]`.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(-1.0, 1.0)
        } else {
            DEFAULT_SIMILARITY_THRESHOLD
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn compare(&self, local: &[f32], remote: &[f32]) -> Result<SimilarityReport, DimensionMismatch> {
        let report = match cosine_similarity(local, remote)? {
            Some(value) => SimilarityReport {
                cosine_similarity: value,
                is_above_threshold: value >= self.threshold,
                degenerate: false,
            },
            None => SimilarityReport {
                cosine_similarity: 0.0,
                is_above_threshold: false,
                degenerate: true,
            },
        };
        Ok(report)
    }

    /// Compare a pipeline embedding with a reference embedding.
    pub fn verify_embedding(
        &self,
        local: &EmbeddingVector,
        remote: &[f32],
    ) -> Result<SimilarityReport, DimensionMismatch> {
        let report = self.compare(local.as_slice(), remote).inspect_err(|err| {
            tracing::warn!("Embedding comparison failed: {err}");
        })?;
        log_report("embedding", &report, self.threshold);
        Ok(report)
    }

    /// Compare one flattened feature family with its reference.
    pub fn verify_feature(
        &self,
        kind: FeatureKind,
        local: &[f32],
        remote: &[f32],
    ) -> Result<SimilarityReport, DimensionMismatch> {
        let report = self.compare(local, remote).inspect_err(|err| {
            tracing::warn!("{} feature comparison failed: {err}", kind.name());
        })?;
        log_report(kind.name(), &report, self.threshold);
        Ok(report)
    }
}

fn log_report(label: &str, report: &SimilarityReport, threshold: f64) {
    if report.degenerate {
        tracing::warn!("{label} similarity undefined: zero-norm vector");
        return;
    }
    tracing::info!(
        "{label} cosine similarity {:.6} (threshold {threshold}, above: {})",
        report.cosine_similarity,
        report.is_above_threshold
    );
}
