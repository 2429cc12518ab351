//! Events delivered to voice session observers.
//!
//! These carry snapshots only; observers never hold a live reference into the
//! controller.

use crate::{VoiceError, VoiceState};

/// Notification emitted by the voice session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// The session moved to a new state
    StateChanged(VoiceState),
    /// A runtime failure; always delivered before the matching error state
    Error(VoiceError),
    /// The accumulated transcript changed
    Transcript(String),
    /// New waveform contents, oldest amplitude first
    Waveform(Vec<f32>),
}
