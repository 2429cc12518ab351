// Re-export from sub-crates
pub use murmur_audio::{AudioBuffer, AudioSource, MemorySource, Waveform};
pub use murmur_core::{
    APP_NAME, APP_NAME_PRETTY, Config, ConfigManager, DEFAULT_LOG_LEVEL, LOG_ENV, ModelId,
    TranscriptionBackend, VoiceError, VoiceErrorKind, VoiceEvent, VoiceState,
};
pub use murmur_transcribe::{
    CaptureEngine, ModelProvisioning, ModelStore, OpenAIClient, OpenAIConfig, RemoteCatalog,
    TranscribeError, Transcriber, TranscriptionEngine,
};
#[cfg(feature = "local-whisper")]
pub use murmur_transcribe::LocalWhisperClient;

// App-specific modules
pub mod session;

pub use session::VoiceSessionController;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
