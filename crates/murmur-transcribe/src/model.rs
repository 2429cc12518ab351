//! Whisper model catalog and downloads.
//!
//! This module handles naming, locating and downloading ggml Whisper models.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::info;

/// Base URL for downloading Whisper models from Hugging Face.
const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

macro_rules! define_models {
    (
        $(
            $variant:ident => {
                name: $name:literal,
                filename: $filename:literal,
                size_mib: $size:literal $(,)?
            }
        ),* $(,)?
    ) => {
        /// Available Whisper model variants.
        ///
        /// For a full list, see: <https://huggingface.co/ggerganov/whisper.cpp>
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum WhisperModel {
            $($variant),*
        }

        impl WhisperModel {
            /// Returns the config name for this model.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }

            /// Returns the filename for this model.
            pub fn filename(&self) -> &'static str {
                match self {
                    $(Self::$variant => $filename),*
                }
            }

            /// Returns the size in MiB.
            fn size_mib(&self) -> u32 {
                match self {
                    $(Self::$variant => $size),*
                }
            }

            /// Parses a model name string into a WhisperModel.
            ///
            /// Model names must match exactly (case-insensitive).
            pub fn from_name(name: &str) -> Option<Self> {
                match name.to_lowercase().as_str() {
                    $($name => Some(Self::$variant)),*,
                    _ => None,
                }
            }

            /// Finds the model stored under `filename`.
            pub fn from_filename(filename: &str) -> Option<Self> {
                match filename {
                    $($filename => Some(Self::$variant)),*,
                    _ => None,
                }
            }

            /// Returns a list of all available model names.
            pub fn all_names() -> &'static [&'static str] {
                &[$($name),*]
            }
        }
    };
}

define_models! {
    Tiny => {
        name: "tiny",
        filename: "ggml-tiny.bin",
        size_mib: 75,
    },
    TinyQ5_1 => {
        name: "tiny-q5_1",
        filename: "ggml-tiny-q5_1.bin",
        size_mib: 31,
    },
    TinyQ8_0 => {
        name: "tiny-q8_0",
        filename: "ggml-tiny-q8_0.bin",
        size_mib: 42,
    },
    TinyEn => {
        name: "tiny.en",
        filename: "ggml-tiny.en.bin",
        size_mib: 75,
    },
    Base => {
        name: "base",
        filename: "ggml-base.bin",
        size_mib: 142,
    },
    BaseQ5_1 => {
        name: "base-q5_1",
        filename: "ggml-base-q5_1.bin",
        size_mib: 57,
    },
    BaseQ8_0 => {
        name: "base-q8_0",
        filename: "ggml-base-q8_0.bin",
        size_mib: 78,
    },
    BaseEn => {
        name: "base.en",
        filename: "ggml-base.en.bin",
        size_mib: 142,
    },
    Small => {
        name: "small",
        filename: "ggml-small.bin",
        size_mib: 466,
    },
    SmallQ8_0 => {
        name: "small-q8_0",
        filename: "ggml-small-q8_0.bin",
        size_mib: 252,
    },
    SmallEn => {
        name: "small.en",
        filename: "ggml-small.en.bin",
        size_mib: 466,
    },
    MediumQ8_0 => {
        name: "medium-q8_0",
        filename: "ggml-medium-q8_0.bin",
        size_mib: 785,
    },
    LargeV3Turbo => {
        name: "large-v3-turbo",
        filename: "ggml-large-v3-turbo.bin",
        size_mib: 1536,
    },
    LargeV3TurboQ5_0 => {
        name: "large-v3-turbo-q5_0",
        filename: "ggml-large-v3-turbo-q5_0.bin",
        size_mib: 547,
    },
    LargeV3TurboQ8_0 => {
        name: "large-v3-turbo-q8_0",
        filename: "ggml-large-v3-turbo-q8_0.bin",
        size_mib: 834,
    },
}

impl WhisperModel {
    /// Returns the download URL for this model.
    pub fn url(&self) -> String {
        format!("{}/{}", MODEL_BASE_URL, self.filename())
    }

    /// Returns the approximate size of this model in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_mib() as u64 * 1024 * 1024
    }

    /// Returns a human-readable size string.
    pub fn size_human(&self) -> String {
        let mib = self.size_mib();
        if mib >= 1024 {
            format!("{:.1} GiB", mib as f64 / 1024.0)
        } else {
            format!("{} MiB", mib)
        }
    }

    /// The model that best fits a machine with `threads` hardware threads.
    pub fn recommended_for(threads: usize) -> Self {
        match threads {
            0..=2 => Self::TinyQ8_0,
            3..=4 => Self::BaseQ8_0,
            5..=8 => Self::SmallQ8_0,
            _ => Self::LargeV3TurboQ8_0,
        }
    }
}

#[allow(clippy::derivable_impls)] // Default is BaseQ8_0, not the first variant
impl Default for WhisperModel {
    fn default() -> Self {
        Self::BaseQ8_0
    }
}

/// Returns the path where a model is stored inside `dir`.
pub fn model_path(dir: &Path, model: WhisperModel) -> PathBuf {
    dir.join(model.filename())
}

/// Checks if a model exists inside `dir`.
pub fn model_exists(dir: &Path, model: WhisperModel) -> bool {
    model_path(dir, model).is_file()
}

/// Downloads a model into `dir`.
///
/// The `progress_callback` is called periodically with (bytes_downloaded, total_bytes).
pub async fn download_model<F>(
    model: WhisperModel,
    dir: &Path,
    progress_callback: F,
) -> Result<PathBuf>
where
    F: Fn(u64, u64) + Send + 'static,
{
    let path = model_path(dir, model);

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create models directory: {:?}", dir))?;

    let url = model.url();
    info!(model = model.name(), url = %url, "Downloading Whisper model");

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to start download from {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(model.size_bytes());

    // Download to a temporary file first, then rename
    let temp_path = path.with_extension("bin.tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| "Failed to read chunk during download")?;
        file.write_all(&chunk)
            .with_context(|| "Failed to write chunk to file")?;
        downloaded += chunk.len() as u64;
        progress_callback(downloaded, total_size);
    }

    file.flush().with_context(|| "Failed to flush file")?;
    drop(file);

    if downloaded == 0 {
        let _ = fs::remove_file(&temp_path);
        anyhow::bail!("Download of {} returned no data", model.filename());
    }

    fs::rename(&temp_path, &path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    info!(path = ?path, bytes = downloaded, "Model download complete");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_name() {
        assert_eq!(
            WhisperModel::from_name("base-q8_0"),
            Some(WhisperModel::BaseQ8_0)
        );
        assert_eq!(WhisperModel::from_name("BASE"), Some(WhisperModel::Base));
        assert_eq!(
            WhisperModel::from_name("tiny.en"),
            Some(WhisperModel::TinyEn)
        );
        assert_eq!(WhisperModel::from_name("invalid"), None);
    }

    #[test]
    fn test_model_from_filename() {
        assert_eq!(
            WhisperModel::from_filename("ggml-small-q8_0.bin"),
            Some(WhisperModel::SmallQ8_0)
        );
        assert_eq!(WhisperModel::from_filename("ggml-small-q8_0.bin.tmp"), None);
    }

    #[test]
    fn test_model_urls() {
        let model = WhisperModel::BaseQ8_0;
        assert!(model.url().contains("ggml-base-q8_0.bin"));
        assert!(model.url().starts_with("https://"));
    }

    #[test]
    fn test_all_names_parse() {
        for name in WhisperModel::all_names() {
            assert!(
                WhisperModel::from_name(name).is_some(),
                "Failed to parse model name: {}",
                name
            );
        }
    }

    #[test]
    fn test_size_human() {
        assert_eq!(WhisperModel::BaseQ8_0.size_human(), "78 MiB");
        assert_eq!(WhisperModel::LargeV3Turbo.size_human(), "1.5 GiB");
    }

    #[test]
    fn test_recommendation_grows_with_threads() {
        assert_eq!(WhisperModel::recommended_for(1), WhisperModel::TinyQ8_0);
        assert_eq!(WhisperModel::recommended_for(4), WhisperModel::BaseQ8_0);
        assert_eq!(WhisperModel::recommended_for(8), WhisperModel::SmallQ8_0);
        assert_eq!(
            WhisperModel::recommended_for(16),
            WhisperModel::LargeV3TurboQ8_0
        );
    }

    #[test]
    fn test_model_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!model_exists(dir.path(), WhisperModel::Tiny));
        fs::write(model_path(dir.path(), WhisperModel::Tiny), b"ggml").unwrap();
        assert!(model_exists(dir.path(), WhisperModel::Tiny));
    }
}
