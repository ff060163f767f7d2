use ndarray::Array2;
use thiserror::Error;

use super::assemble::ModelInput;

/// Runtime failures while executing the embedding model.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// An input array could not be handed to the runtime.
    #[error("Failed to build {name} input tensor: {message}")]
    Tensor { name: String, message: String },
    /// The runtime rejected the inputs or failed while running.
    #[error("Embedding model run failed: {0}")]
    Runtime(String),
    /// The declared output was not produced.
    #[error("Embedding model produced no {name:?} output")]
    MissingOutput { name: String },
    /// The output is not a `[batch, dim]` matrix.
    #[error("Embedding output has unexpected shape {shape:?}")]
    OutputShape { shape: Vec<i64> },
    /// The output row count differs from the input batch.
    #[error("Embedding output has {actual} rows for a batch of {expected}")]
    BatchMismatch { expected: usize, actual: usize },
    /// The output width differs from the declared embedding size.
    #[error("Embedding output has {actual} dimensions, model declares {expected}")]
    OutputDim { expected: usize, actual: usize },
    /// Pooling produced an empty vector.
    #[error("Embedding model produced an empty embedding")]
    EmptyOutput,
    #[error("Embedding model session lock poisoned")]
    LockPoisoned,
}

/// Executes an embedding model on assembled tensors.
///
/// Implementations must be callable from several threads at once; runtimes
/// that are not reentrant serialize calls internally.
pub trait EmbeddingBackend: Send + Sync {
    /// Width of one output row.
    fn embedding_dim(&self) -> usize;

    /// Run the model and return the raw `[batch, embedding_dim]` output.
    fn run(&self, input: &ModelInput) -> Result<Array2<f32>, InferenceError>;
}
