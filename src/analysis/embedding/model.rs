use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use super::assemble::ModelInput;
use super::backend::{EmbeddingBackend, InferenceError};
use crate::app_dirs;
use crate::config::ModelConfig;

/// Environment override for the model definition path.
pub const MODEL_PATH_ENV: &str = "RESONANCE_MODEL_PATH";
const DEFAULT_MODEL_FILE: &str = "model.onnx";

static SHARED_MODEL: ModelCache<OnnxEmbeddingModel> = ModelCache::new();

/// Failures while locating or loading the model artifact.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Embedding model definition not found at {path}")]
    MissingDefinition { path: PathBuf },
    #[error("Embedding model weights not found at {path}")]
    MissingData { path: PathBuf },
    #[error("Failed to read embedding model {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ONNX Runtime rejected embedding model {path}: {message}")]
    Runtime { path: PathBuf, message: String },
    #[error("No model path configured and no application directory available")]
    NoModelPath,
    #[error("Shared embedding model lock poisoned")]
    CachePoisoned,
}

/// Model definition plus its external weights file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelArtifact {
    definition: PathBuf,
    data: PathBuf,
}

impl ModelArtifact {
    /// `data_file` defaults to `<definition file name>.data` next to the definition.
    pub fn new(definition: impl Into<PathBuf>, data_file: Option<&str>) -> Self {
        let definition = definition.into();
        let data_name = match data_file {
            Some(name) => name.to_string(),
            None => format!(
                "{}.data",
                definition
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string())
            ),
        };
        let data = definition.with_file_name(data_name);
        Self { definition, data }
    }

    /// Resolve from the environment override, config, or the app directory.
    pub fn resolve(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let definition = match env::var(MODEL_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => match &config.path {
                Some(path) => path.clone(),
                None => app_dirs::models_dir()
                    .map_err(|_| ModelLoadError::NoModelPath)?
                    .join(DEFAULT_MODEL_FILE),
            },
        };
        Ok(Self::new(definition, config.data_file.as_deref()))
    }

    pub fn definition(&self) -> &Path {
        &self.definition
    }

    pub fn data(&self) -> &Path {
        &self.data
    }

    /// Both files must exist before the runtime is asked to load them.
    pub fn verify(&self) -> Result<(), ModelLoadError> {
        if !self.definition.is_file() {
            return Err(ModelLoadError::MissingDefinition {
                path: self.definition.clone(),
            });
        }
        if !self.data.is_file() {
            return Err(ModelLoadError::MissingData {
                path: self.data.clone(),
            });
        }
        Ok(())
    }

    /// BLAKE3 digest of the definition file.
    pub fn digest(&self) -> Result<String, ModelLoadError> {
        let map_err = |source| ModelLoadError::Read {
            path: self.definition.clone(),
            source,
        };
        let mut file = fs::File::open(&self.definition).map_err(map_err)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer).map_err(map_err)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Graph input and output names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorNames {
    pub mel: String,
    pub chroma: String,
    pub tempo: String,
    pub output: String,
}

/// Runtime options that are part of the cache identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelOptions {
    pub names: TensorNames,
    pub embedding_dim: usize,
    pub intra_threads: usize,
}

impl ModelOptions {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            names: TensorNames {
                mel: config.mel_input.clone(),
                chroma: config.chroma_input.clone(),
                tempo: config.tempo_input.clone(),
                output: config.output.clone(),
            },
            embedding_dim: config.embedding_dim,
            intra_threads: config.intra_threads.max(1),
        }
    }
}

/// ONNX Runtime embedding model.
///
/// The session is not reentrant, so runs are serialized behind a mutex.
pub struct OnnxEmbeddingModel {
    artifact: ModelArtifact,
    options: ModelOptions,
    digest: String,
    session: Mutex<Session>,
}

impl OnnxEmbeddingModel {
    pub fn load(artifact: ModelArtifact, options: ModelOptions) -> Result<Self, ModelLoadError> {
        artifact.verify()?;
        let digest = artifact.digest()?;
        let session = Session::builder()
            .and_then(|builder| builder.with_intra_threads(options.intra_threads))
            .and_then(|builder| builder.commit_from_file(artifact.definition()))
            .map_err(|err| ModelLoadError::Runtime {
                path: artifact.definition.clone(),
                message: err.to_string(),
            })?;
        tracing::info!(
            "Loaded embedding model {} (blake3 {})",
            artifact.definition.display(),
            digest
        );
        Ok(Self {
            artifact,
            options,
            digest,
            session: Mutex::new(session),
        })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl EmbeddingBackend for OnnxEmbeddingModel {
    fn embedding_dim(&self) -> usize {
        self.options.embedding_dim
    }

    fn run(&self, input: &ModelInput) -> Result<Array2<f32>, InferenceError> {
        let names = &self.options.names;
        let tensor_err = |name: &str| {
            let name = name.to_string();
            move |err: ort::Error| InferenceError::Tensor {
                name,
                message: err.to_string(),
            }
        };
        let mel = Tensor::from_array(input.mel.clone()).map_err(tensor_err(&names.mel))?;
        let chroma = Tensor::from_array(input.chroma.clone()).map_err(tensor_err(&names.chroma))?;
        let tempo = Tensor::from_array(input.tempo.clone()).map_err(tensor_err(&names.tempo))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::LockPoisoned)?;
        let outputs = session
            .run(ort::inputs![
                names.mel.as_str() => mel,
                names.chroma.as_str() => chroma,
                names.tempo.as_str() => tempo
            ])
            .map_err(|err| InferenceError::Runtime(err.to_string()))?;
        let (_, value) = outputs
            .iter()
            .find(|(name, _)| *name == names.output.as_str())
            .ok_or_else(|| InferenceError::MissingOutput {
                name: names.output.clone(),
            })?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|err| InferenceError::Runtime(err.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        let &[rows, cols] = dims.as_slice() else {
            return Err(InferenceError::OutputShape { shape: dims });
        };
        if rows < 0 || cols < 0 {
            return Err(InferenceError::OutputShape { shape: dims });
        }
        Array2::from_shape_vec((rows as usize, cols as usize), data.to_vec())
            .map_err(|_| InferenceError::OutputShape { shape: dims })
    }
}

/// One-slot cache of a loaded model, keyed on artifact and options.
pub(crate) struct ModelCache<M> {
    slot: Mutex<Option<CachedModel<M>>>,
}

struct CachedModel<M> {
    artifact: ModelArtifact,
    options: ModelOptions,
    model: Arc<M>,
}

impl<M> ModelCache<M> {
    pub(crate) const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Cached model for the key, or the result of `load` stored in its place.
    pub(crate) fn get_or_load<F>(
        &self,
        artifact: &ModelArtifact,
        options: &ModelOptions,
        load: F,
    ) -> Result<Arc<M>, ModelLoadError>
    where
        F: FnOnce(ModelArtifact, ModelOptions) -> Result<M, ModelLoadError>,
    {
        let mut guard = self.slot.lock().map_err(|_| ModelLoadError::CachePoisoned)?;
        if let Some(cached) = guard.as_ref() {
            if cached.artifact == *artifact && cached.options == *options {
                return Ok(Arc::clone(&cached.model));
            }
        }
        let model = Arc::new(load(artifact.clone(), options.clone())?);
        *guard = Some(CachedModel {
            artifact: artifact.clone(),
            options: options.clone(),
            model: Arc::clone(&model),
        });
        Ok(model)
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }

    /// Clear unless another thread holds the cache lock.
    pub(crate) fn try_clear(&self) -> bool {
        if let Ok(mut guard) = self.slot.try_lock() {
            *guard = None;
            return true;
        }
        false
    }
}

/// Return the process-wide model for `artifact`, loading it on first use.
///
/// A request for a different artifact or options replaces the cached model;
/// handles already given out stay valid until dropped.
pub fn shared_model(
    artifact: &ModelArtifact,
    options: &ModelOptions,
) -> Result<Arc<OnnxEmbeddingModel>, ModelLoadError> {
    SHARED_MODEL.get_or_load(artifact, options, OnnxEmbeddingModel::load)
}

/// Drop the cached model.
pub fn reset_shared_model() {
    SHARED_MODEL.clear();
}

/// Drop the cached model unless another thread holds the cache lock.
pub fn try_reset_shared_model() -> bool {
    SHARED_MODEL.try_clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn options() -> ModelOptions {
        ModelOptions::from_config(&ModelConfig::default())
    }

    #[test]
    fn data_file_defaults_next_to_definition() {
        let artifact = ModelArtifact::new("/models/model.onnx", None);
        assert_eq!(artifact.data(), Path::new("/models/model.onnx.data"));
        let custom = ModelArtifact::new("/models/net.onnx", Some("weights.bin"));
        assert_eq!(custom.data(), Path::new("/models/weights.bin"));
    }

    #[test]
    fn missing_definition_is_a_load_error() {
        let dir = tempdir().unwrap();
        let artifact = ModelArtifact::new(dir.path().join("model.onnx"), None);
        let err = shared_model(&artifact, &options()).err().unwrap();
        assert!(matches!(err, ModelLoadError::MissingDefinition { .. }));
    }

    #[test]
    fn missing_weights_is_a_load_error() {
        let dir = tempdir().unwrap();
        let definition = dir.path().join("model.onnx");
        std::fs::write(&definition, b"onnx").unwrap();
        let artifact = ModelArtifact::new(&definition, None);
        let err = OnnxEmbeddingModel::load(artifact, options()).err().unwrap();
        assert!(matches!(err, ModelLoadError::MissingData { .. }));
    }

    fn counting_loader(
        loads: &AtomicUsize,
    ) -> impl FnOnce(ModelArtifact, ModelOptions) -> Result<ModelArtifact, ModelLoadError> + '_
    {
        move |artifact, _| {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(artifact)
        }
    }

    #[test]
    fn cache_hands_out_one_model_per_key() {
        let cache = ModelCache::<ModelArtifact>::new();
        let loads = AtomicUsize::new(0);
        let artifact = ModelArtifact::new("/models/model.onnx", None);

        let first = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        let second = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_replaces_model_for_new_artifact_or_options() {
        let cache = ModelCache::<ModelArtifact>::new();
        let loads = AtomicUsize::new(0);
        let artifact = ModelArtifact::new("/models/model.onnx", None);
        let other = ModelArtifact::new("/models/other.onnx", None);

        let first = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        let replaced = cache
            .get_or_load(&other, &options(), counting_loader(&loads))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &replaced));
        assert_eq!(replaced.definition(), Path::new("/models/other.onnx"));

        let mut threaded = options();
        threaded.intra_threads += 1;
        let retuned = cache
            .get_or_load(&other, &threaded, counting_loader(&loads))
            .unwrap();
        assert!(!Arc::ptr_eq(&replaced, &retuned));
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        assert_eq!(first.definition(), Path::new("/models/model.onnx"));
    }

    #[test]
    fn cleared_cache_loads_again() {
        let cache = ModelCache::<ModelArtifact>::new();
        let loads = AtomicUsize::new(0);
        let artifact = ModelArtifact::new("/models/model.onnx", None);

        let first = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        cache.clear();
        let second = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(cache.try_clear());
        let third = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_load_leaves_cached_model_in_place() {
        let cache = ModelCache::<ModelArtifact>::new();
        let loads = AtomicUsize::new(0);
        let artifact = ModelArtifact::new("/models/model.onnx", None);
        let first = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();

        let missing = ModelArtifact::new("/models/missing.onnx", None);
        let err = cache
            .get_or_load(&missing, &options(), |artifact, _| {
                Err(ModelLoadError::MissingDefinition {
                    path: artifact.definition().to_path_buf(),
                })
            })
            .err()
            .unwrap();
        assert!(matches!(err, ModelLoadError::MissingDefinition { .. }));

        let again = cache
            .get_or_load(&artifact, &options(), counting_loader(&loads))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn concurrent_requests_share_one_load() {
        let cache = ModelCache::<ModelArtifact>::new();
        let loads = AtomicUsize::new(0);
        let artifact = ModelArtifact::new("/models/model.onnx", None);

        let models: Vec<Arc<ModelArtifact>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_load(&artifact, &options(), counting_loader(&loads))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(models.iter().all(|model| Arc::ptr_eq(model, &models[0])));
    }

    #[test]
    fn digest_is_stable_blake3_hex() {
        let dir = tempdir().unwrap();
        let definition = dir.path().join("model.onnx");
        std::fs::write(&definition, b"resonance").unwrap();
        let artifact = ModelArtifact::new(&definition, None);
        let digest = artifact.digest().unwrap();
        assert_eq!(digest, blake3::hash(b"resonance").to_hex().to_string());
    }
}
