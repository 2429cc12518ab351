//! Hosted transcription over the OpenAI audio API.
//!
//! Recordings are uploaded as a single float WAV. The hosted model needs no
//! local files, so [`crate::RemoteCatalog`] pairs with this client.

use async_trait::async_trait;
use murmur_audio::AudioBuffer;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Result, TranscribeError, Transcriber};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_MODEL: &str = "gpt-4o-mini-transcribe";

/// Credentials, model and endpoint for hosted transcription.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send uploads to a compatible server instead of api.openai.com.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Describe a rejected request, preferring the server's own message.
fn rejection(status: StatusCode, body: &str) -> TranscribeError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    TranscribeError::ApiError(format!("{status}: {detail}"))
}

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    config: OpenAIConfig,
}

impl OpenAIClient {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        Self::new(OpenAIConfig::new(api_key))
    }

    /// The hosted model this client transcribes with.
    pub fn model(&self) -> &str {
        self.config.model()
    }

    fn upload(&self, wav: Vec<u8>, language: Option<&str>) -> Result<Form> {
        let file = Part::bytes(wav)
            .file_name("capture.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::InvalidAudioFormat(e.to_string()))?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("response_format", "json")
            .part("file", file);
        Ok(match language {
            Some(language) => form.text("language", language.to_string()),
            None => form,
        })
    }

    async fn read_text(response: Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Hosted transcription rejected");
            return Err(rejection(status, &body));
        }
        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;
        Ok(transcription.text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for OpenAIClient {
    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(TranscribeError::NoApiKey);
        }
        // Nothing captured, nothing to upload
        if audio.is_empty() {
            return Ok(String::new());
        }

        let wav = audio
            .to_wav()
            .map_err(|e| TranscribeError::InvalidAudioFormat(e.to_string()))?;
        debug!(
            model = self.config.model(),
            length_seconds = audio.duration().as_secs_f64(),
            upload_bytes = wav.len(),
            language = ?language,
            "Uploading capture"
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .multipart(self.upload(wav, language)?)
            .send()
            .await?;
        Self::read_text(response).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}
