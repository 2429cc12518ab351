//! In-memory audio buffers and their WAV framing.
//!
//! Wav ~ 467KiB every 5 seconds at 48kHz mono f32, which is well within what
//! hosted transcription endpoints accept for a single utterance.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use hound::{WavReader, WavWriter};
use parking_lot::Mutex;
use tracing::debug;

use crate::{AudioError, Result};

/// Captured audio as interleaved f32 samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Append another buffer captured in the same format. An empty buffer
    /// adopts the format of what is appended to it.
    pub fn append(&mut self, other: AudioBuffer) {
        if self.samples.is_empty() {
            self.sample_rate = other.sample_rate;
            self.channels = other.channels;
        }
        self.samples.extend(other.samples);
    }

    /// Downmix to a single channel by averaging each frame.
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Encode as a 32-bit float WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let buffer = MemoryWriter::new();
        let mut writer = WavWriter::new(buffer.clone(), spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        // Finalize so the writer patches the framing information.
        writer.finalize()?;
        buffer.try_into_inner()
    }

    /// Decode a WAV file of float or integer samples.
    pub fn from_wav(data: &[u8]) -> Result<Self> {
        let reader = WavReader::new(Cursor::new(data))?;
        let spec = reader.spec();

        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits_per_sample = spec.bits_per_sample,
            "Decoding wav"
        );

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample;
                if bits == 0 || bits > 32 {
                    return Err(AudioError::SampleFormatNotSupported(format!(
                        "{bits}-bit integer"
                    )));
                }
                let max_val = (1u64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }
}

/// A cheaply cloneable handle to the bytes being written. The finalize method
/// for the wav writer does not return the inner data, so we store it behind an
/// Arc<Mutex> to get it back afterwards.
#[derive(Debug, Clone)]
struct MemoryWriter {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(Vec::with_capacity(8 * 1024)))),
        }
    }

    fn try_into_inner(self) -> Result<Vec<u8>> {
        let owned = Arc::try_unwrap(self.inner).map_err(|_| {
            AudioError::Wav(hound::Error::IoError(io::Error::other(
                "wav writer still holds the buffer",
            )))
        })?;
        Ok(owned.into_inner().into_inner())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}
