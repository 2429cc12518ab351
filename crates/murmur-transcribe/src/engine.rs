//! A transcription engine assembled from an audio source and a batch
//! transcriber.
//!
//! Streaming is chunked: a background task periodically drains whatever the
//! source captured since the last tick and transcribes it on its own, so each
//! chunk yields one text increment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use murmur_audio::{AudioBuffer, AudioError, AudioSource, level};
use murmur_core::{Config, ModelId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{LevelStream, Result, TextStream, TranscribeError, TranscriptionEngine, Transcriber};

/// Text increments buffered ahead of the consumer.
const STREAM_BUFFER: usize = 16;

/// Engine over an [`AudioSource`] and a [`Transcriber`].
pub struct CaptureEngine<S> {
    source: Arc<S>,
    transcriber: Arc<dyn Transcriber>,
    language: Option<String>,
    stream_interval: Duration,
    min_stream_chunk: Duration,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: AudioSource + 'static> CaptureEngine<S> {
    pub fn new(source: Arc<S>, transcriber: Arc<dyn Transcriber>) -> Self {
        let defaults = Config::default();
        Self {
            source,
            transcriber,
            language: None,
            stream_interval: defaults.stream_interval(),
            min_stream_chunk: defaults.min_stream_chunk(),
            stream_task: Mutex::new(None),
        }
    }

    /// Apply the language hint and streaming cadence from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.language = config.language().map(str::to_owned);
        self.stream_interval = config.stream_interval();
        self.min_stream_chunk = config.min_stream_chunk();
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }
}

impl<S> Drop for CaptureEngine<S> {
    fn drop(&mut self) {
        if let Some(task) = self.stream_task.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl<S: AudioSource + 'static> TranscriptionEngine for CaptureEngine<S> {
    async fn prepare(&self, model: &ModelId) -> Result<()> {
        info!(model = %model, transcriber = self.transcriber.name(), "Preparing model");
        self.transcriber.prepare(model).await
    }

    async fn begin_capture(&self) -> Result<LevelStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.source.start(Box::new(move |frames| {
            tx.send(level(frames)).ok();
        }))?;

        // The sender lives in the source callback, so the stream ends with the capture.
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|level| (level, rx))
        })
        .boxed())
    }

    async fn end_capture(&self) -> Result<AudioBuffer> {
        Ok(self.source.finish()?)
    }

    async fn transcribe(&self, audio: AudioBuffer) -> Result<String> {
        info!(
            transcriber = self.transcriber.name(),
            length_seconds = audio.duration().as_secs_f64(),
            "Transcribing capture"
        );
        self.transcriber
            .transcribe(&audio, self.language.as_deref())
            .await
    }

    async fn open_stream(&self) -> Result<TextStream> {
        let mut task = self.stream_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(TranscribeError::Capture(AudioError::AlreadyActive));
        }

        self.source.start(Box::new(|_| {}))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        *task = Some(tokio::spawn(stream_chunks(
            self.source.clone(),
            self.transcriber.clone(),
            self.language.clone(),
            self.stream_interval,
            self.min_stream_chunk,
            tx,
        )));

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|text| (text, rx))
        })
        .boxed())
    }

    async fn close_stream(&self) -> Result<()> {
        let task = self
            .stream_task
            .lock()
            .take()
            .ok_or(TranscribeError::StreamNotOpen)?;
        task.abort();

        match self.source.finish() {
            Ok(rest) => debug!(
                discarded_seconds = rest.duration().as_secs_f64(),
                "Stream closed"
            ),
            // The stream task stops the source itself when it fails.
            Err(AudioError::NotActive) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Drain the source every `interval`, transcribing each chunk that reaches
/// `min_chunk` and sending the non-empty text downstream.
async fn stream_chunks<S: AudioSource>(
    source: Arc<S>,
    transcriber: Arc<dyn Transcriber>,
    language: Option<String>,
    interval: Duration,
    min_chunk: Duration,
    tx: mpsc::Sender<Result<String>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut held = AudioBuffer::default();
    loop {
        ticker.tick().await;

        match source.take_chunk() {
            Ok(chunk) => held.append(chunk),
            Err(AudioError::NotActive) => break,
            Err(e) => {
                tx.send(Err(e.into())).await.ok();
                break;
            }
        }

        if held.is_empty() || held.duration() < min_chunk {
            continue;
        }

        let chunk = std::mem::take(&mut held);
        match transcriber.transcribe(&chunk, language.as_deref()).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                debug!(chars = text.len(), "Stream increment");
                if tx.send(Ok(text.to_string())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Stream chunk failed to transcribe");
                source.finish().ok();
                tx.send(Err(e)).await.ok();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use murmur_audio::MemorySource;

    use super::*;

    /// Reports how many samples it was given.
    struct CountingTranscriber {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTranscriber {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, audio: &AudioBuffer, _language: Option<&str>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TranscribeError::TranscriptionFailed("boom".to_string()));
            }
            Ok(format!("{} samples", audio.samples().len()))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn engine(fail: bool) -> (Arc<MemorySource>, CaptureEngine<MemorySource>) {
        let source = Arc::new(MemorySource::new(1_000, 1));
        let config = Config {
            stream_interval_ms: 10,
            min_stream_chunk_ms: 100,
            ..Default::default()
        };
        let engine =
            CaptureEngine::new(source.clone(), CountingTranscriber::new(fail)).with_config(&config);
        (source, engine)
    }

    #[tokio::test]
    async fn test_batch_capture_reports_levels() {
        let (source, engine) = engine(false);
        let mut levels = engine.begin_capture().await.unwrap();

        source.push(&[0.0; 10]);
        source.push(&[1.0; 10]);
        assert_eq!(levels.next().await, Some(0.0));
        assert_eq!(levels.next().await, Some(1.0));

        let audio = engine.end_capture().await.unwrap();
        assert_eq!(audio.samples().len(), 20);
        assert_eq!(levels.next().await, None);

        let text = engine.transcribe(audio).await.unwrap();
        assert_eq!(text, "20 samples");
    }

    #[tokio::test]
    async fn test_stream_yields_one_increment_per_chunk() {
        let (source, engine) = engine(false);
        let mut texts = engine.open_stream().await.unwrap();

        source.push(&[0.2; 150]);
        assert_eq!(texts.next().await.unwrap().unwrap(), "150 samples");

        // Too short on its own, held until more audio arrives.
        source.push(&[0.2; 50]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        source.push(&[0.2; 60]);
        assert_eq!(texts.next().await.unwrap().unwrap(), "110 samples");

        engine.close_stream().await.unwrap();
        assert!(!source.is_active());
        assert!(texts.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_failure_is_forwarded() {
        let (source, engine) = engine(true);
        let mut texts = engine.open_stream().await.unwrap();

        source.push(&[0.2; 200]);
        assert!(texts.next().await.unwrap().is_err());
        assert!(!source.is_active());
        engine.close_stream().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_open_fails() {
        let (_source, engine) = engine(false);
        assert!(matches!(
            engine.close_stream().await,
            Err(TranscribeError::StreamNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_capture_and_stream_share_the_source() {
        let (_source, engine) = engine(false);
        let _levels = engine.begin_capture().await.unwrap();
        assert!(matches!(
            engine.open_stream().await,
            Err(TranscribeError::Capture(AudioError::AlreadyActive))
        ));
    }
}
