//! Voice session state types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a transcription model, e.g. `"base-q8_0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModelId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Kind of failure surfaced by a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceErrorKind {
    /// Operation attempted from a state that forbids it
    NotReady,
    /// Model listing, selection, download or load failed
    ModelProvisioningFailed,
    /// Batch or streaming inference failed
    TranscriptionFailed,
    /// Attempt superseded by a newer one or explicitly aborted
    Cancelled,
}

impl fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotReady => "not ready",
            Self::ModelProvisioningFailed => "model provisioning failed",
            Self::TranscriptionFailed => "transcription failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// What the voice session controller is currently doing.
///
/// Exactly one variant is active at a time. Observers always receive the
/// full value, never a diff.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VoiceState {
    /// No model loaded
    #[default]
    Idle,
    /// The model is being fetched; `progress` is in `0.0..=1.0`
    DownloadingModel { progress: f32, model: ModelId },
    /// The model is on device and being loaded into memory
    PreparingModel,
    /// Model loaded, nothing being captured
    Ready,
    /// Batch audio capture in progress
    Recording,
    /// Finishing a batch capture or running streaming inference
    Transcribing,
    /// The last operation failed; requires a new initialize to leave
    Error { kind: VoiceErrorKind },
}

impl VoiceState {
    /// Whether a model download or load is in flight.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::DownloadingModel { .. } | Self::PreparingModel)
    }

    /// Short label for logs and status displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DownloadingModel { .. } => "downloading model",
            Self::PreparingModel => "preparing model",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(VoiceState::default(), VoiceState::Idle);
    }

    #[test]
    fn test_provisioning_states() {
        let downloading = VoiceState::DownloadingModel {
            progress: 0.5,
            model: ModelId::from("base"),
        };
        assert!(downloading.is_provisioning());
        assert!(VoiceState::PreparingModel.is_provisioning());
        assert!(!VoiceState::Ready.is_provisioning());
        assert!(!VoiceState::Recording.is_provisioning());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = VoiceState::Error {
            kind: VoiceErrorKind::TranscriptionFailed,
        };
        let value = toml::Value::try_from(&state).unwrap();
        assert_eq!(value["state"].as_str(), Some("error"));
        assert_eq!(value["kind"].as_str(), Some("transcription_failed"));
    }
}
