//! Audio buffers, capture sources and waveform levels for murmur.
//!
//! The hardware capture pipeline lives outside this crate. It feeds frames
//! into an [`AudioSource`], which is what the transcription engine drains.

mod buffer;
mod source;
mod waveform;

pub use buffer::AudioBuffer;
pub use source::{AudioSource, FrameCallback, MemorySource};
use thiserror::Error;
pub use waveform::Waveform;

#[derive(Debug, Error)]
pub enum AudioError {
    /// A capture is already running on this source
    #[error("capture already active")]
    AlreadyActive,
    /// The source is not capturing
    #[error("no active capture")]
    NotActive,
    /// WAV encoding or decoding failed
    #[error(transparent)]
    Wav(#[from] hound::Error),
    /// Sample format not supported
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Sample rate most speech models expect.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

pub const MIN_DB: f32 = -96.0;

/// Convert a slice of f32 samples to dBFS.
pub fn db_fs(data: &[f32]) -> f32 {
    let max_sample = data
        .iter()
        .fold(0.0_f32, |max, &sample| sample.abs().max(max));

    (20.0 * max_sample.log10()).clamp(MIN_DB, 0.0)
}

/// Display amplitude in `0.0..=1.0`, linear in dBFS above [`MIN_DB`].
pub fn level(data: &[f32]) -> f32 {
    ((db_fs(data) - MIN_DB) / -MIN_DB).clamp(0.0, 1.0)
}
