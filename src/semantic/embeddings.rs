//! Embedding providers.
//!
//! `EmbeddingProvider` is the contract the index builder and search engine
//! consume. Providers carry an explicit lifecycle (`ModelStatus`) and refuse
//! to embed until they report `ready`.
//!
//! `FastEmbedProvider` wraps fastembed's `TextEmbedding`:
//! - Checks the model cache to tell "needs download" from "needs load"
//! - Loads with a download timeout and probes the vector dimensionality
//! - Embeds in sub-batches so long builds can report progress

use std::path::PathBuf;
use std::sync::{mpsc, Mutex, RwLock};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SemanticSearchConfig;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Marker written next to the model files once a load succeeded.
const LOADED_MARKER_PREFIX: &str = ".loaded-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    Idle,
    Checking,
    Unavailable,
    NeedsDownload,
    NeedsLoad,
    Downloading,
    Loading,
    Ready,
    Error,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Idle => "idle",
            StatusKind::Checking => "checking",
            StatusKind::Unavailable => "unavailable",
            StatusKind::NeedsDownload => "needs-download",
            StatusKind::NeedsLoad => "needs-load",
            StatusKind::Downloading => "downloading",
            StatusKind::Loading => "loading",
            StatusKind::Ready => "ready",
            StatusKind::Error => "error",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            StatusKind::Idle => "Not loaded",
            StatusKind::Checking => "Checking model cache",
            StatusKind::Unavailable => "Not configured",
            StatusKind::NeedsDownload => "Model not downloaded",
            StatusKind::NeedsLoad => "Model cached, ready to load",
            StatusKind::Downloading => "Downloading model",
            StatusKind::Loading => "Loading model",
            StatusKind::Ready => "Available",
            StatusKind::Error => "Model failed to load",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model availability as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub kind: StatusKind,
    pub message: String,
    /// Fraction in [0, 1], only while downloading or loading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

impl ModelStatus {
    pub fn new(kind: StatusKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            progress: None,
        }
    }

    pub fn with_message(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            progress: None,
        }
    }

    pub fn in_progress(kind: StatusKind, progress: f32) -> Self {
        Self {
            progress: Some(progress.clamp(0.0, 1.0)),
            ..Self::new(kind)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.kind == StatusKind::Ready
    }
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Embedding model not ready (status: {0})")]
    ModelNotReady(StatusKind),

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Fail fast unless the provider reports `ready`.
pub fn require_ready(status: &ModelStatus) -> Result<(), EmbeddingError> {
    match status.kind {
        StatusKind::Ready => Ok(()),
        StatusKind::Unavailable => Err(EmbeddingError::ModelUnavailable(status.message.clone())),
        kind => Err(EmbeddingError::ModelNotReady(kind)),
    }
}

/// Text → vector service with an explicit lifecycle.
///
/// Identical text embedded by the same loaded model yields identical vectors.
/// `embed` and `embed_batch` fail with `ModelNotReady` unless status is ready.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the model (e.g. `all-MiniLM-L6-v2`).
    fn model_id(&self) -> &str;

    /// Current status without touching disk.
    fn status(&self) -> ModelStatus;

    /// Re-inspect availability (model cache, loaded state).
    fn check_availability(&self) -> ModelStatus;

    /// Download if needed and load the model. Progress is a fraction in [0, 1].
    fn load(&self, on_progress: &dyn Fn(f32)) -> Result<(), EmbeddingError>;

    /// Vector dimensionality, known once loaded.
    fn dimensions(&self) -> Option<usize>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts in one call, reporting progress in [0, 1].
    fn embed_batch(
        &self,
        texts: &[String],
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// SHA256 of the model id, used to version stored indexes.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.model_id())
    }
}

pub fn model_id_hash(model_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.finalize().into()
}

struct LoadedModel {
    embedding: TextEmbedding,
    dimensions: usize,
}

/// fastembed-backed provider. Models are cached in `models/` under the base path.
pub struct FastEmbedProvider {
    model_name: String,
    variant: fastembed::EmbeddingModel,
    models_dir: PathBuf,
    allow_download: bool,
    download_timeout: Duration,
    batch_size: usize,
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    model: Mutex<Option<LoadedModel>>,
    status: RwLock<ModelStatus>,
}

impl FastEmbedProvider {
    /// Create an unloaded provider. Nothing is downloaded until `load`.
    pub fn new(config: &SemanticSearchConfig, base_path: PathBuf) -> Result<Self, EmbeddingError> {
        let variant = Self::parse_model_name(&config.model)?;
        let download_timeout = match config.download_timeout_secs {
            0 => DEFAULT_DOWNLOAD_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        Ok(Self {
            model_name: config.model.clone(),
            variant,
            models_dir: base_path.join("models"),
            allow_download: config.allow_download,
            download_timeout,
            batch_size: config.embed_batch_size.max(1),
            model: Mutex::new(None),
            status: RwLock::new(ModelStatus::new(StatusKind::Idle)),
        })
    }

    /// Drop the loaded model and return to `idle`.
    pub fn unload(&self) {
        if let Ok(mut guard) = self.model.lock() {
            *guard = None;
        }
        self.set_status(ModelStatus::new(StatusKind::Idle));
    }

    /// Unload and delete all downloaded model files.
    pub fn clear_model_cache(&self) -> std::io::Result<()> {
        self.unload();
        if self.models_dir.exists() {
            std::fs::remove_dir_all(&self.models_dir)?;
        }
        Ok(())
    }

    fn set_status(&self, status: ModelStatus) {
        log::debug!("model {} status -> {}", self.model_name, status.kind);
        if let Ok(mut guard) = self.status.write() {
            *guard = status;
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.models_dir
            .join(format!("{LOADED_MARKER_PREFIX}{}", self.model_name.to_lowercase()))
    }

    fn is_cached(&self) -> bool {
        self.marker_path().exists()
    }

    fn is_loaded(&self) -> bool {
        self.model
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn init_model(&self) -> Result<LoadedModel, EmbeddingError> {
        std::fs::create_dir_all(&self.models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let variant = self.variant.clone();
        let models_dir = self.models_dir.clone();

        // fastembed has no cancellation; on timeout the init thread is left
        // to finish in the background and its result is dropped.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let options = InitOptions::new(variant)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);
            let _ = tx.send(TextEmbedding::try_new(options));
        });

        let mut embedding = match rx.recv_timeout(self.download_timeout) {
            Ok(result) => result.map_err(|e| EmbeddingError::InitFailed(e.to_string()))?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(EmbeddingError::DownloadTimeout(self.download_timeout.as_secs()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(EmbeddingError::InitFailed(
                    "model init thread exited unexpectedly".to_string(),
                ))
            }
        };

        let dimensions = Self::probe_dimensions(&mut embedding)?;
        Ok(LoadedModel {
            embedding,
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn status(&self) -> ModelStatus {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|e| ModelStatus::with_message(StatusKind::Error, e.to_string()))
    }

    fn check_availability(&self) -> ModelStatus {
        if self.is_loaded() {
            return self.status();
        }

        // a load on another thread owns the status until it finishes
        let current = self.status();
        if matches!(current.kind, StatusKind::Downloading | StatusKind::Loading) {
            return current;
        }

        self.set_status(ModelStatus::new(StatusKind::Checking));

        let status = if self.is_cached() {
            ModelStatus::new(StatusKind::NeedsLoad)
        } else if self.allow_download {
            ModelStatus::new(StatusKind::NeedsDownload)
        } else {
            ModelStatus::with_message(
                StatusKind::Unavailable,
                "Model not downloaded and downloads are disabled",
            )
        };

        self.set_status(status.clone());
        status
    }

    fn load(&self, on_progress: &dyn Fn(f32)) -> Result<(), EmbeddingError> {
        if self.is_loaded() {
            on_progress(1.0);
            return Ok(());
        }

        let phase = if self.is_cached() {
            StatusKind::Loading
        } else if self.allow_download {
            StatusKind::Downloading
        } else {
            let status = self.check_availability();
            return Err(EmbeddingError::ModelUnavailable(status.message));
        };

        log::info!("Initializing embedding model '{}' ({})", self.model_name, phase);
        self.set_status(ModelStatus::in_progress(phase, 0.0));
        on_progress(0.0);

        let loaded = match self.init_model() {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("Failed to load model '{}': {}", self.model_name, e);
                self.set_status(ModelStatus::with_message(StatusKind::Error, e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = std::fs::write(self.marker_path(), self.model_name.as_bytes()) {
            log::warn!("Could not record model cache marker: {}", e);
        }

        log::info!(
            "Model '{}' ready ({} dimensions)",
            self.model_name,
            loaded.dimensions
        );

        let mut guard = self.model.lock().map_err(|e| {
            let err = EmbeddingError::InitFailed(format!("Failed to acquire model lock: {}", e));
            self.set_status(ModelStatus::with_message(StatusKind::Error, err.to_string()));
            err
        })?;
        *guard = Some(loaded);
        drop(guard);

        self.set_status(ModelStatus::new(StatusKind::Ready));
        on_progress(1.0);
        Ok(())
    }

    fn dimensions(&self) -> Option<usize> {
        self.model
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|m| m.dimensions))
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        require_ready(&self.status())?;

        let mut guard = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;
        let model = guard
            .as_mut()
            .ok_or(EmbeddingError::ModelNotReady(StatusKind::Idle))?;

        let embeddings = model
            .embedding
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_batch(
        &self,
        texts: &[String],
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        require_ready(&self.status())?;

        if texts.is_empty() {
            on_progress(1.0);
            return Ok(vec![]);
        }

        let mut guard = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;
        let model = guard
            .as_mut()
            .ok_or(EmbeddingError::ModelNotReady(StatusKind::Idle))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = model
                .embedding
                .embed(batch.to_vec(), None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            vectors.extend(embedded);
            on_progress(vectors.len() as f32 / texts.len() as f32);
        }

        Ok(vectors)
    }
}
