//! Model provisioning and transcription backends for murmur.
//!
//! This crate defines the two capabilities the voice session controller
//! drives, [`ModelProvisioning`] and [`TranscriptionEngine`], together with
//! their concrete implementations: a file-backed Whisper model store, a
//! hosted model catalog, OpenAI and local Whisper transcribers, and an engine
//! that combines an audio source with a transcriber.

mod engine;
mod model;
mod openai;
mod provision;

#[cfg(feature = "local-whisper")]
mod local;

use async_trait::async_trait;
pub use engine::CaptureEngine;
use futures_util::stream::BoxStream;
#[cfg(feature = "local-whisper")]
pub use local::LocalWhisperClient;
pub use model::{WhisperModel, download_model, model_exists, model_path};
use murmur_audio::{AudioBuffer, AudioError};
use murmur_core::ModelId;
pub use openai::{OpenAIClient, OpenAIConfig};
pub use provision::{
    DownloadProgress, ModelProvisioning, ModelStore, ProvisionError, RemoteCatalog,
};
use thiserror::Error;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Audio capture failed: {0}")]
    Capture(#[from] AudioError),

    #[error("Failed to load model {model}: {reason}")]
    ModelLoad { model: ModelId, reason: String },

    #[error("No transcription stream is open")]
    StreamNotOpen,

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Amplitude levels in `0.0..=1.0` produced while a capture runs.
pub type LevelStream = BoxStream<'static, f32>;

/// Partial transcription text produced while a stream is open.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Trait for batch transcription backends.
///
/// Implement this trait to add new transcription backends (e.g. other cloud
/// providers or other local inference libraries).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Load the given model so later calls do not pay for it. Backends
    /// without a local model accept any id.
    async fn prepare(&self, _model: &ModelId) -> Result<()> {
        Ok(())
    }

    /// Transcribe audio to text.
    ///
    /// # Arguments
    /// * `audio` - Captured samples; backends encode or resample as needed.
    /// * `language` - Optional language hint (ISO 639-1 code, e.g., "en")
    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}

/// The transcription capability driven by the voice session controller:
/// audio capture plus batch and streaming inference.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Load the model into memory.
    async fn prepare(&self, model: &ModelId) -> Result<()>;

    /// Start a batch capture, returning its amplitude levels.
    async fn begin_capture(&self) -> Result<LevelStream>;

    /// Stop the batch capture and return everything captured.
    async fn end_capture(&self) -> Result<AudioBuffer>;

    /// Transcribe a finished capture.
    async fn transcribe(&self, audio: AudioBuffer) -> Result<String>;

    /// Start capturing and transcribing incrementally.
    async fn open_stream(&self) -> Result<TextStream>;

    /// Stop the stream opened by [`TranscriptionEngine::open_stream`].
    async fn close_stream(&self) -> Result<()>;
}
