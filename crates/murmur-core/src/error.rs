use thiserror::Error;

use crate::state::VoiceErrorKind;

/// Errors surfaced by a voice session.
///
/// The message of a runtime failure carries the originating error from the
/// provisioning or transcription capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("operation not allowed while {state}")]
    NotReady { state: &'static str },

    #[error("model provisioning failed: {0}")]
    ModelProvisioningFailed(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("attempt was cancelled")]
    Cancelled,
}

impl VoiceError {
    pub fn kind(&self) -> VoiceErrorKind {
        match self {
            Self::NotReady { .. } => VoiceErrorKind::NotReady,
            Self::ModelProvisioningFailed(_) => VoiceErrorKind::ModelProvisioningFailed,
            Self::TranscriptionFailed(_) => VoiceErrorKind::TranscriptionFailed,
            Self::Cancelled => VoiceErrorKind::Cancelled,
        }
    }

    pub fn provisioning(err: impl std::fmt::Display) -> Self {
        Self::ModelProvisioningFailed(err.to_string())
    }

    pub fn transcription(err: impl std::fmt::Display) -> Self {
        Self::TranscriptionFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            VoiceError::NotReady { state: "idle" }.kind(),
            VoiceErrorKind::NotReady
        );
        assert_eq!(
            VoiceError::provisioning("offline").kind(),
            VoiceErrorKind::ModelProvisioningFailed
        );
        assert_eq!(
            VoiceError::transcription("bad audio").to_string(),
            "transcription failed: bad audio"
        );
    }
}
