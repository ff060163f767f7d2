use ndarray::{Array2, ArrayView2, Axis};

use super::assemble::ModelInput;
use super::backend::{EmbeddingBackend, InferenceError};
use super::EmbeddingVector;

/// Epsilon added to norms before dividing during pooling.
pub const EMBEDDING_EPS: f64 = 1e-12;

/// Run `backend` on `input` and pool the per-excerpt rows into one vector.
///
/// Each row is L2-normalized, the rows are averaged and the mean is
/// normalized again. Failures are returned as-is; inference is deterministic
/// so nothing is retried.
pub fn embed(
    backend: &dyn EmbeddingBackend,
    input: &ModelInput,
) -> Result<EmbeddingVector, InferenceError> {
    let output = backend.run(input)?;
    check_output(&output, input.batch_size(), backend.embedding_dim())?;
    let pooled = pool_embeddings(output.view());
    tracing::debug!(
        "Pooled {} excerpt embeddings into {} dimensions",
        output.nrows(),
        pooled.len()
    );
    let vector = EmbeddingVector::new(pooled)?;
    if vector.is_degenerate() {
        tracing::warn!(
            "Model returned all-zero embeddings for {} excerpts; similarity will be degenerate",
            output.nrows()
        );
    }
    Ok(vector)
}

fn check_output(output: &Array2<f32>, batch: usize, dim: usize) -> Result<(), InferenceError> {
    if output.nrows() != batch {
        return Err(InferenceError::BatchMismatch {
            expected: batch,
            actual: output.nrows(),
        });
    }
    if output.ncols() != dim {
        return Err(InferenceError::OutputDim {
            expected: dim,
            actual: output.ncols(),
        });
    }
    if output.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }
    Ok(())
}

/// Mean of L2-normalized rows, itself L2-normalized.
pub fn pool_embeddings(rows: ArrayView2<'_, f32>) -> Vec<f32> {
    let dim = rows.ncols();
    let count = rows.nrows();
    if count == 0 || dim == 0 {
        return Vec::new();
    }
    let mut mean = vec![0.0_f64; dim];
    for row in rows.axis_iter(Axis(0)) {
        let norm = row.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        let scale = 1.0 / (norm + EMBEDDING_EPS);
        for (acc, value) in mean.iter_mut().zip(row.iter()) {
            *acc += *value as f64 * scale;
        }
    }
    for acc in &mut mean {
        *acc /= count as f64;
    }
    let norm = mean.iter().map(|v| v * v).sum::<f64>().sqrt();
    let scale = 1.0 / (norm + EMBEDDING_EPS);
    mean.iter().map(|v| (v * scale) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    struct FixedBackend {
        output: Array2<f32>,
    }

    impl EmbeddingBackend for FixedBackend {
        fn embedding_dim(&self) -> usize {
            self.output.ncols()
        }

        fn run(&self, _input: &ModelInput) -> Result<Array2<f32>, InferenceError> {
            Ok(self.output.clone())
        }
    }

    fn input(batch: usize) -> ModelInput {
        ModelInput {
            mel: Array3::zeros((batch, 2, 3)),
            chroma: Array3::zeros((batch, 12, 3)),
            tempo: Array2::zeros((batch, 4)),
        }
    }

    #[test]
    fn pooling_normalizes_rows_before_averaging() {
        let rows = array![[3.0_f32, 4.0], [0.0, 10.0]];
        let pooled = pool_embeddings(rows.view());
        // rows -> [0.6, 0.8] and [0, 1]; mean [0.3, 0.9]
        let norm = (0.3_f64.powi(2) + 0.9_f64.powi(2)).sqrt();
        assert!((pooled[0] as f64 - 0.3 / norm).abs() < 1e-6);
        assert!((pooled[1] as f64 - 0.9 / norm).abs() < 1e-6);
    }

    #[test]
    fn zero_rows_pool_to_zero_without_nan() {
        let pooled = pool_embeddings(Array2::<f32>::zeros((2, 3)).view());
        assert_eq!(pooled, vec![0.0; 3]);
    }

    #[test]
    fn embed_returns_unit_vector_of_model_width() {
        let backend = FixedBackend {
            output: array![[1.0_f32, 0.0, 0.0, 1.0], [0.0, 2.0, 0.0, 2.0]],
        };
        let embedding = embed(&backend, &input(2)).unwrap();
        assert_eq!(embedding.len(), 4);
        let norm: f32 = embedding.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn all_zero_model_output_is_flagged_degenerate() {
        let backend = FixedBackend {
            output: Array2::zeros((2, 4)),
        };
        let embedding = embed(&backend, &input(2)).unwrap();
        assert_eq!(embedding.len(), 4);
        assert!(embedding.is_degenerate());

        let healthy = FixedBackend {
            output: array![[1.0_f32, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
        };
        assert!(!embed(&healthy, &input(2)).unwrap().is_degenerate());
    }

    #[test]
    fn batch_mismatch_is_an_inference_error() {
        let backend = FixedBackend {
            output: array![[1.0_f32, 0.0]],
        };
        let err = embed(&backend, &input(3)).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::BatchMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }
}
