//! Model provisioning: which models are on device, which one to use, and how
//! to fetch it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::io;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use murmur_core::{Config, ModelId, models_dir};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{WhisperModel, download_model};

/// Capacity of the progress channel; ticks beyond it are dropped.
const PROGRESS_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("failed to read models directory: {0}")]
    Io(#[from] io::Error),

    #[error("download ended before completing")]
    Interrupted,

    #[error(transparent)]
    Download(#[from] anyhow::Error),
}

/// Download progress in `0.0..=1.0`, terminating after `1.0` or an error.
pub type DownloadProgress = BoxStream<'static, Result<f32, ProvisionError>>;

/// The model provisioning capability driven by the voice session controller.
#[async_trait]
pub trait ModelProvisioning: Send + Sync {
    /// Models already present on this device.
    async fn list_downloaded(&self) -> Result<HashSet<ModelId>, ProvisionError>;

    /// The single model to use on this device with the current config.
    async fn optimal_model(&self) -> Result<ModelId, ProvisionError>;

    /// Start fetching `model`. Dropping the stream abandons the download.
    fn download(&self, model: &ModelId) -> DownloadProgress;
}

/// Aborts the download task when the progress stream is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// File-backed Whisper models stored in a single directory.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    preferred: Option<String>,
    threads: usize,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            dir: dir.into(),
            preferred: None,
            threads,
        }
    }

    /// Store in the default models directory honoring `local_model`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut store = Self::new(models_dir()?);
        store.preferred = config.local_model().map(str::to_owned);
        Ok(store)
    }

    /// Use this model instead of the device recommendation.
    pub fn with_preferred(mut self, name: impl Into<String>) -> Self {
        self.preferred = Some(name.into());
        self
    }

    /// Override the detected hardware thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(name: &str) -> Result<WhisperModel, ProvisionError> {
        WhisperModel::from_name(name).ok_or_else(|| ProvisionError::UnknownModel(name.to_owned()))
    }
}

#[async_trait]
impl ModelProvisioning for ModelStore {
    async fn list_downloaded(&self) -> Result<HashSet<ModelId>, ProvisionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut models = HashSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(model) = entry.file_name().to_str().and_then(WhisperModel::from_filename) {
                models.insert(ModelId::new(model.name()));
            }
        }

        debug!(dir = ?self.dir, count = models.len(), "Listed downloaded models");
        Ok(models)
    }

    async fn optimal_model(&self) -> Result<ModelId, ProvisionError> {
        let model = match &self.preferred {
            Some(name) => Self::resolve(name)?,
            None => WhisperModel::recommended_for(self.threads),
        };
        Ok(ModelId::new(model.name()))
    }

    fn download(&self, model: &ModelId) -> DownloadProgress {
        let model = match Self::resolve(model.as_str()) {
            Ok(model) => model,
            Err(e) => return stream::once(async move { Err::<f32, _>(e) }).boxed(),
        };

        info!(model = model.name(), size = %model.size_human(), "Model not on device, downloading");

        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let dir = self.dir.clone();
        let handle = tokio::spawn(async move {
            let ticks = tx.clone();
            let result = download_model(model, &dir, move |done, total| {
                let fraction = if total == 0 {
                    0.0
                } else {
                    (done as f64 / total as f64).min(1.0) as f32
                };
                // Progress is lossy; only the terminal item must arrive.
                ticks.try_send(Ok(fraction)).ok();
            })
            .await;

            let last = match result {
                Ok(_) => Ok(1.0),
                Err(e) => {
                    warn!(model = model.name(), error = ?e, "Model download failed");
                    Err(ProvisionError::Download(e))
                }
            };
            tx.send(last).await.ok();
        });

        progress_stream(rx, AbortOnDrop(handle))
    }
}

fn progress_stream(
    rx: mpsc::Receiver<Result<f32, ProvisionError>>,
    guard: AbortOnDrop,
) -> DownloadProgress {
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|item| (item, (rx, guard)))
    })
    .boxed()
}

/// Provisioning for hosted backends: the remote model is always available.
#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    model: ModelId,
}

impl RemoteCatalog {
    pub fn new(model: impl Into<ModelId>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl ModelProvisioning for RemoteCatalog {
    async fn list_downloaded(&self) -> Result<HashSet<ModelId>, ProvisionError> {
        Ok(HashSet::from([self.model.clone()]))
    }

    async fn optimal_model(&self) -> Result<ModelId, ProvisionError> {
        Ok(self.model.clone())
    }

    fn download(&self, model: &ModelId) -> DownloadProgress {
        if *model == self.model {
            stream::iter([Ok::<f32, ProvisionError>(1.0)]).boxed()
        } else {
            let name = model.to_string();
            stream::once(async move { Err::<f32, _>(ProvisionError::UnknownModel(name)) }).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_missing_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("absent"));
        assert!(store.list_downloaded().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_only_known_model_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ggml-base-q8_0.bin"), b"ggml").unwrap();
        fs::write(dir.path().join("ggml-tiny.bin.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("ggml-small.bin")).unwrap();

        let store = ModelStore::new(dir.path());
        let models = store.list_downloaded().await.unwrap();
        assert_eq!(models, HashSet::from([ModelId::from("base-q8_0")]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_file_in_place_of_dir_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models");
        fs::write(&path, b"not a directory").unwrap();

        let store = ModelStore::new(&path);
        let err = store.list_downloaded().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[tokio::test]
    async fn test_optimal_model_follows_threads() {
        let store = ModelStore::new("/unused").with_threads(4);
        assert_eq!(
            store.optimal_model().await.unwrap(),
            ModelId::from("base-q8_0")
        );
    }

    #[tokio::test]
    async fn test_preferred_model_wins() {
        let store = ModelStore::new("/unused")
            .with_threads(64)
            .with_preferred("Tiny.en");
        assert_eq!(store.optimal_model().await.unwrap(), ModelId::from("tiny.en"));

        let store = ModelStore::new("/unused").with_preferred("gigantic");
        assert!(matches!(
            store.optimal_model().await,
            Err(ProvisionError::UnknownModel(name)) if name == "gigantic"
        ));
    }

    #[tokio::test]
    async fn test_unknown_model_download_fails() {
        let store = ModelStore::new("/unused");
        let items: Vec<_> = store.download(&ModelId::from("nope")).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ProvisionError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_remote_catalog_is_always_ready() {
        let catalog = RemoteCatalog::new("gpt-4o-mini-transcribe");
        let model = catalog.optimal_model().await.unwrap();
        assert!(catalog.list_downloaded().await.unwrap().contains(&model));

        let items: Vec<_> = catalog.download(&model).collect().await;
        assert!(matches!(items.as_slice(), [Ok(p)] if *p == 1.0));
    }
}
