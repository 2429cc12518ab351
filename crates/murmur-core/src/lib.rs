//! Core types and configuration for murmur.
//!
//! This crate provides the platform-agnostic vocabulary shared by all murmur
//! sub-crates: the voice session state, its error taxonomy, observer events
//! and the on-disk configuration.

mod config;
mod error;
mod event;
mod state;

pub use config::{Config, ConfigManager, TranscriptionBackend, default_data_dir, models_dir};
pub use error::VoiceError;
pub use event::VoiceEvent;
pub use state::{ModelId, VoiceErrorKind, VoiceState};

/// Application name
pub const APP_NAME: &str = "murmur";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Murmur";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MURMUR_LOG";
