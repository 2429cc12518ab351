//! Configuration management for murmur.
//!
//! This module provides the on-disk configuration shared by the session
//! controller and the transcription backends.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::{config_dir, data_local_dir};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::APP_NAME;

/// Transcription backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionBackend {
    /// Use OpenAI's hosted transcription API (requires API key)
    OpenAI,
    /// Use a local Whisper model (requires local-whisper feature)
    Local,
}

#[allow(clippy::derivable_impls)] // Conditional default based on feature flag
impl Default for TranscriptionBackend {
    fn default() -> Self {
        #[cfg(feature = "local-whisper")]
        {
            TranscriptionBackend::Local
        }
        #[cfg(not(feature = "local-whisper"))]
        {
            TranscriptionBackend::OpenAI
        }
    }
}

/// Returns the default data directory for murmur.
///
/// This is where downloaded models are stored.
pub fn default_data_dir() -> Result<PathBuf> {
    let data_dir = data_local_dir().context("Failed to get data local directory")?;
    Ok(data_dir.join(APP_NAME))
}

/// Returns the directory where Whisper models are stored.
pub fn models_dir() -> Result<PathBuf> {
    Ok(default_data_dir()?.join("models"))
}

fn is_default_backend(v: &TranscriptionBackend) -> bool {
    *v == TranscriptionBackend::default()
}

/// Core configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Transcription backend to use (openai or local)
    #[serde(default, skip_serializing_if = "is_default_backend")]
    pub backend: TranscriptionBackend,

    /// OpenAI API key (required for openai backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Model to use for OpenAI transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_model: Option<String>,

    /// Local whisper model overriding the device-optimal choice (e.g. "base-q8_0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_model: Option<String>,

    /// Preferred language for transcription (ISO 639-1 code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Number of amplitude samples kept for the waveform display
    #[serde(
        default = "default_waveform_capacity",
        skip_serializing_if = "is_default_waveform_capacity"
    )]
    pub waveform_capacity: usize,

    /// How often streaming transcription takes a new chunk (in milliseconds)
    #[serde(
        default = "default_stream_interval_ms",
        skip_serializing_if = "is_default_stream_interval_ms"
    )]
    pub stream_interval_ms: u64,

    /// Streaming chunks shorter than this are held back (in milliseconds)
    #[serde(
        default = "default_min_stream_chunk_ms",
        skip_serializing_if = "is_default_min_stream_chunk_ms"
    )]
    pub min_stream_chunk_ms: u64,
}

fn default_waveform_capacity() -> usize {
    64
}

fn is_default_waveform_capacity(v: &usize) -> bool {
    *v == default_waveform_capacity()
}

fn default_stream_interval_ms() -> u64 {
    1500
}

fn is_default_stream_interval_ms(v: &u64) -> bool {
    *v == default_stream_interval_ms()
}

fn default_min_stream_chunk_ms() -> u64 {
    300
}

fn is_default_min_stream_chunk_ms(v: &u64) -> bool {
    *v == default_min_stream_chunk_ms()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: TranscriptionBackend::default(),
            openai_key: None,
            openai_model: None,
            local_model: None,
            language: None,
            waveform_capacity: default_waveform_capacity(),
            stream_interval_ms: default_stream_interval_ms(),
            min_stream_chunk_ms: default_min_stream_chunk_ms(),
        }
    }
}

impl Config {
    /// Get the transcription backend
    pub fn backend(&self) -> &TranscriptionBackend {
        &self.backend
    }

    /// Get the OpenAI API key
    pub fn key_openai(&self) -> Option<&str> {
        self.openai_key.as_deref()
    }

    /// Get the OpenAI model name
    pub fn openai_model(&self) -> Option<&str> {
        self.openai_model.as_deref()
    }

    /// Get the local whisper model name
    pub fn local_model(&self) -> Option<&str> {
        self.local_model.as_deref()
    }

    /// Get the preferred language
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Waveform ring capacity, never zero
    pub fn waveform_capacity(&self) -> usize {
        self.waveform_capacity.max(1)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms.max(1))
    }

    pub fn min_stream_chunk(&self) -> Duration {
        Duration::from_millis(self.min_stream_chunk_ms)
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.backend == TranscriptionBackend::OpenAI && config.key_openai().is_none() {
            warn!(
                path = ?self.config_path,
                "OpenAI API key is not set. Transcriptions will not work without it."
            );
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
