use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use murmur::{
    AudioBuffer, CaptureEngine, Config, ConfigManager, DEFAULT_LOG_LEVEL, LOG_ENV, MemorySource,
    ModelProvisioning, OpenAIClient, OpenAIConfig, RemoteCatalog, Transcriber,
    TranscriptionBackend, VERSION, VoiceEvent, VoiceSessionController,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Frames pushed into the source per replay step.
const REPLAY_STEP: Duration = Duration::from_millis(100);

fn backend(config: &Config) -> Result<(Arc<dyn ModelProvisioning>, Arc<dyn Transcriber>)> {
    match config.backend() {
        TranscriptionBackend::OpenAI => {
            let key = config
                .key_openai()
                .context("OpenAI backend selected but no API key is configured")?;
            let mut openai = OpenAIConfig::new(key);
            if let Some(model) = config.openai_model() {
                openai = openai.with_model(model);
            }
            let client = OpenAIClient::new(openai);
            let catalog = RemoteCatalog::new(client.model());
            Ok((Arc::new(catalog), Arc::new(client)))
        }
        #[cfg(feature = "local-whisper")]
        TranscriptionBackend::Local => {
            let store = murmur::ModelStore::from_config(config)?;
            let client = murmur::LocalWhisperClient::new(store.dir());
            Ok((Arc::new(store), Arc::new(client)))
        }
        #[cfg(not(feature = "local-whisper"))]
        TranscriptionBackend::Local => {
            anyhow::bail!(
                "local backend selected but murmur was built without the local-whisper feature"
            )
        }
    }
}

/// Log every session event until the controller goes away.
async fn log_events(mut events: mpsc::UnboundedReceiver<VoiceEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::StateChanged(state) => info!(state = ?state, "State changed"),
            VoiceEvent::Error(e) => error!(error = %e, "Session error"),
            VoiceEvent::Transcript(text) => info!(chars = text.len(), "Transcript updated"),
            VoiceEvent::Waveform(_) => {}
        }
    }
}

/// Feed `audio` into `source` in steps, in real time when `paced`.
async fn replay(source: &MemorySource, audio: &AudioBuffer, paced: bool) {
    let step = (audio.sample_rate() as f64 * REPLAY_STEP.as_secs_f64()) as usize
        * audio.channels() as usize;
    for frames in audio.samples().chunks(step.max(1)) {
        if !source.push(frames) {
            warn!("Source stopped before the recording finished replaying");
            break;
        }
        if paced {
            tokio::time::sleep(REPLAY_STEP).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("murmur {VERSION}");
        eprintln!("Usage: {} <audio.wav> [--stream]", args[0]);
        std::process::exit(1);
    };
    let streaming = args.iter().skip(2).any(|a| a == "--stream");

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config)?;

    let bytes = fs::read(path).with_context(|| format!("Failed to read {path}"))?;
    let audio = AudioBuffer::from_wav(&bytes).with_context(|| format!("Failed to decode {path}"))?;
    info!(
        path = %path,
        length_seconds = audio.duration().as_secs_f64(),
        sample_rate = audio.sample_rate(),
        channels = audio.channels(),
        "Loaded recording"
    );

    let (provisioning, transcriber) = backend(&config)?;
    let source = Arc::new(MemorySource::new(audio.sample_rate(), audio.channels()));
    let engine = CaptureEngine::new(source.clone(), transcriber).with_config(&config);
    let session = VoiceSessionController::new(provisioning, Arc::new(engine)).with_config(&config);
    tokio::spawn(log_events(session.subscribe()));

    session.initialize().await?;
    info!(model = ?session.model(), "Murmur ready");

    let transcript = if streaming {
        session.start_streaming().await?;
        replay(&source, &audio, true).await;
        // Let the last chunk reach the transcriber
        tokio::time::sleep(config.stream_interval() * 2).await;
        session.stop_streaming().await?
    } else {
        session.start_recording().await?;
        replay(&source, &audio, false).await;
        session.stop_recording().await?
    };

    println!("{transcript}");
    Ok(())
}
