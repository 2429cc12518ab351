//! Local Whisper transcription using whisper-rs.
//!
//! This module provides local transcription using the whisper.cpp library
//! via whisper-rs bindings.

use std::path::PathBuf;

use async_trait::async_trait;
use murmur_audio::{AudioBuffer, SPEECH_SAMPLE_RATE};
use murmur_core::ModelId;
use parking_lot::Mutex;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::model::{WhisperModel, model_path};
use crate::{Result, TranscribeError, Transcriber};

struct LoadedModel {
    id: ModelId,
    context: WhisperContext,
}

/// Local Whisper transcriber using whisper.cpp.
pub struct LocalWhisperClient {
    models_dir: PathBuf,
    /// Loaded by `prepare`, replaced when a different model is prepared.
    loaded: Mutex<Option<LoadedModel>>,
}

impl LocalWhisperClient {
    /// Create a client loading models from `models_dir`.
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            loaded: Mutex::new(None),
        }
    }

    fn load(&self, id: &ModelId) -> Result<WhisperContext> {
        let load_error = |reason: String| TranscribeError::ModelLoad {
            model: id.clone(),
            reason,
        };

        let model = WhisperModel::from_name(id.as_str())
            .ok_or_else(|| load_error("unknown model".to_string()))?;
        let path = model_path(&self.models_dir, model);

        info!(path = ?path, "Loading Whisper model");

        let context = WhisperContext::new_with_params(
            path.to_str()
                .ok_or_else(|| load_error("invalid model path".to_string()))?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| load_error(e.to_string()))?;

        info!("Whisper model loaded successfully");
        Ok(context)
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let src_idx_floor = src_idx.floor() as usize;
        let frac = src_idx - src_idx_floor as f64;

        let sample = if src_idx_floor + 1 < samples.len() {
            let s0 = samples[src_idx_floor] as f64;
            let s1 = samples[src_idx_floor + 1] as f64;
            (s0 * (1.0 - frac) + s1 * frac) as f32
        } else if src_idx_floor < samples.len() {
            samples[src_idx_floor]
        } else {
            0.0
        };

        result.push(sample);
    }

    result
}

#[async_trait]
impl Transcriber for LocalWhisperClient {
    async fn prepare(&self, model: &ModelId) -> Result<()> {
        let mut loaded = self.loaded.lock();
        if loaded.as_ref().is_some_and(|l| &l.id == model) {
            return Ok(());
        }
        let context = self.load(model)?;
        *loaded = Some(LoadedModel {
            id: model.clone(),
            context,
        });
        Ok(())
    }

    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let samples = resample(&audio.to_mono(), audio.sample_rate(), SPEECH_SAMPLE_RATE);
        debug!(
            original_frames = audio.frames(),
            resampled_samples = samples.len(),
            "Audio conversion complete"
        );

        let loaded = self.loaded.lock();
        let loaded = loaded.as_ref().ok_or_else(|| {
            TranscribeError::TranscriptionFailed("no model prepared".to_string())
        })?;

        let mut state = loaded.context.create_state().map_err(|e| {
            TranscribeError::TranscriptionFailed(format!("Failed to create state: {}", e))
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        // None auto-detects the language
        params.set_language(language);

        // Disable printing to stdout
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state.full(params, &samples).map_err(|e| {
            TranscribeError::TranscriptionFailed(format!("Transcription failed: {}", e))
        })?;

        let num_segments = state.full_n_segments().map_err(|e| {
            TranscribeError::TranscriptionFailed(format!("Failed to get segments: {}", e))
        })?;

        let mut result = String::new();
        for i in 0..num_segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                TranscribeError::TranscriptionFailed(format!("Failed to get segment {}: {}", i, e))
            })?;
            result.push_str(&segment);
        }

        Ok(result.trim().to_string())
    }

    fn name(&self) -> &str {
        "local-whisper"
    }
}
