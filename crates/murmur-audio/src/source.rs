//! Capture sources. There can only be one active capture per source at a time
//! and storage of the captured audio is up to the caller.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{AudioBuffer, AudioError, Result};

/// Called with every block of interleaved frames as it is captured.
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send>;

/// A buffer-producing capture interface.
///
/// `take_chunk` and `finish` each return the audio captured since the
/// previous `take_chunk` (or since `start`), so a batch consumer calls only
/// `finish` while a streaming consumer drains chunks as it goes.
pub trait AudioSource: Send + Sync {
    /// Begin capturing. `on_frames` observes every captured block.
    fn start(&self, on_frames: FrameCallback) -> Result<()>;

    /// Drain the audio captured so far without stopping.
    fn take_chunk(&self) -> Result<AudioBuffer>;

    /// Stop capturing and return the remaining audio.
    fn finish(&self) -> Result<AudioBuffer>;

    /// Whether a capture is running.
    fn is_active(&self) -> bool;
}

struct Capture {
    pending: Vec<f32>,
    on_frames: FrameCallback,
}

/// An [`AudioSource`] fed by pushing frames into it, e.g. from a hardware
/// input callback or a decoded file.
pub struct MemorySource {
    sample_rate: u32,
    channels: u16,
    capture: Mutex<Option<Capture>>,
}

impl MemorySource {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            capture: Mutex::new(None),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Feed captured frames. Returns false when no capture is running, in
    /// which case the frames are dropped.
    pub fn push(&self, frames: &[f32]) -> bool {
        let mut guard = self.capture.lock();
        let Some(capture) = guard.as_mut() else {
            return false;
        };
        capture.pending.extend_from_slice(frames);
        (capture.on_frames)(frames);
        true
    }

    fn buffer(&self, samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer::new(samples, self.sample_rate, self.channels)
    }
}

impl AudioSource for MemorySource {
    fn start(&self, on_frames: FrameCallback) -> Result<()> {
        let mut guard = self.capture.lock();
        if guard.is_some() {
            return Err(AudioError::AlreadyActive);
        }
        info!(
            sample_rate = self.sample_rate,
            channels = self.channels,
            "Starting capture"
        );
        *guard = Some(Capture {
            pending: Vec::with_capacity(self.sample_rate as usize),
            on_frames,
        });
        Ok(())
    }

    fn take_chunk(&self) -> Result<AudioBuffer> {
        let mut guard = self.capture.lock();
        let capture = guard.as_mut().ok_or(AudioError::NotActive)?;
        let samples = std::mem::take(&mut capture.pending);
        debug!(samples = samples.len(), "Took capture chunk");
        Ok(self.buffer(samples))
    }

    fn finish(&self) -> Result<AudioBuffer> {
        let capture = self.capture.lock().take().ok_or(AudioError::NotActive)?;
        info!(samples = capture.pending.len(), "Ending capture");
        Ok(self.buffer(capture.pending))
    }

    fn is_active(&self) -> bool {
        self.capture.lock().is_some()
    }
}
