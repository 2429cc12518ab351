//! The voice session controller.
//!
//! Every state transition goes through one serialization point, the mutex
//! around [`Inner`], which is never held across an await. Long-running work
//! (download, model load, capture, inference) runs outside of it and reports
//! back tagged with the attempt it belongs to; completions for any attempt
//! other than the current one are dropped.

use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use murmur_audio::Waveform;
use murmur_core::{Config, ModelId, VoiceError, VoiceEvent, VoiceState};
use murmur_transcribe::{
    LevelStream, ModelProvisioning, ProvisionError, TextStream, TranscriptionEngine,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the controller is doing behind the observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Idle,
    /// Lookup, download or load of a model
    Provisioning,
    /// Batch capture requested, engine not capturing yet
    Starting,
    /// Batch capture running
    Capturing,
    /// Batch capture ended, transcription running
    Finishing,
    Streaming,
}

struct Inner {
    state: VoiceState,
    /// Mirrors `state` for callers awaiting an in-flight initialize.
    states: watch::Sender<VoiceState>,
    /// The failure behind the current `Error` state.
    last_error: Option<VoiceError>,
    activity: Activity,
    attempt: u64,
    model: Option<ModelId>,
    transcript: String,
    waveform: Waveform,
    observers: Vec<mpsc::UnboundedSender<VoiceEvent>>,
    /// Level forwarder during capture, stream pump during streaming.
    task: Option<JoinHandle<()>>,
}

impl Inner {
    fn emit(&mut self, event: VoiceEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: VoiceState) {
        match &state {
            VoiceState::DownloadingModel { progress, model } => {
                debug!(attempt = self.attempt, model = %model, progress, "Download progress")
            }
            _ => info!(attempt = self.attempt, state = state.label(), "State changed"),
        }
        self.state = state.clone();
        self.states.send_replace(state.clone());
        self.emit(VoiceEvent::StateChanged(state));
    }

    fn not_ready(&self) -> VoiceError {
        VoiceError::NotReady {
            state: self.state.label(),
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Report the failure, then enter the error state.
    fn fail(&mut self, error: VoiceError) {
        warn!(attempt = self.attempt, error = %error, "Voice session failed");
        self.abort_task();
        self.activity = Activity::Idle;
        let kind = error.kind();
        self.last_error = Some(error.clone());
        self.emit(VoiceEvent::Error(error));
        self.set_state(VoiceState::Error { kind });
    }

    fn append_transcript(&mut self, increment: &str) {
        let needs_space = !self.transcript.is_empty()
            && !self.transcript.ends_with(char::is_whitespace)
            && !increment.starts_with(char::is_whitespace);
        if needs_space {
            self.transcript.push(' ');
        }
        self.transcript.push_str(increment);
        self.emit(VoiceEvent::Transcript(self.transcript.clone()));
    }
}

struct Shared {
    provisioning: Arc<dyn ModelProvisioning>,
    engine: Arc<dyn TranscriptionEngine>,
    inner: Mutex<Inner>,
    /// Mirrors `Inner::attempt` so suspended operations notice supersession.
    attempts: watch::Sender<u64>,
}

impl Shared {
    fn begin_attempt(&self, inner: &mut Inner) -> u64 {
        inner.attempt += 1;
        self.attempts.send_replace(inner.attempt);
        inner.attempt
    }

    /// Run `f` at the serialization point if `attempt` is still current.
    fn with_attempt<R>(&self, attempt: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.attempt != attempt {
            debug!(
                attempt,
                current = inner.attempt,
                "Discarding completion of stale attempt"
            );
            return None;
        }
        Some(f(&mut inner))
    }

    fn transition(&self, attempt: u64, state: VoiceState) -> Result<(), VoiceError> {
        self.with_attempt(attempt, |inner| inner.set_state(state))
            .ok_or(VoiceError::Cancelled)
    }

    /// Fail `attempt`, or report it as cancelled when it is stale.
    fn fail(&self, attempt: u64, error: VoiceError) -> VoiceError {
        match self.with_attempt(attempt, |inner| inner.fail(error.clone())) {
            Some(()) => error,
            None => VoiceError::Cancelled,
        }
    }

    /// Drive `fut` unless `attempt` is superseded first, in which case the
    /// future is dropped and `None` returned.
    async fn until_superseded<F: Future>(&self, attempt: u64, fut: F) -> Option<F::Output> {
        let mut attempts = self.attempts.subscribe();
        if *attempts.borrow_and_update() != attempt {
            return None;
        }

        let superseded = async {
            loop {
                if attempts.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *attempts.borrow_and_update() != attempt {
                    return;
                }
            }
        };

        tokio::select! {
            biased;
            output = fut => Some(output),
            _ = superseded => None,
        }
    }

    async fn release_capture(&self) {
        if let Err(e) = self.engine.end_capture().await {
            debug!(error = %e, "No capture to release");
        }
    }

    async fn release_stream(&self) {
        if let Err(e) = self.engine.close_stream().await {
            debug!(error = %e, "No stream to release");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.inner.get_mut().abort_task();
    }
}

/// Orchestrates model provisioning and batch or streaming transcription
/// behind a single observable [`VoiceState`].
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct VoiceSessionController {
    shared: Arc<Shared>,
}

impl VoiceSessionController {
    pub fn new(
        provisioning: Arc<dyn ModelProvisioning>,
        engine: Arc<dyn TranscriptionEngine>,
    ) -> Self {
        let (attempts, _) = watch::channel(0);
        let (states, _) = watch::channel(VoiceState::Idle);
        let inner = Inner {
            state: VoiceState::Idle,
            states,
            last_error: None,
            activity: Activity::Idle,
            attempt: 0,
            model: None,
            transcript: String::new(),
            waveform: Waveform::new(Config::default().waveform_capacity()),
            observers: Vec::new(),
            task: None,
        };
        Self {
            shared: Arc::new(Shared {
                provisioning,
                engine,
                inner: Mutex::new(inner),
                attempts,
            }),
        }
    }

    /// Apply the waveform capacity from `config`.
    pub fn with_config(self, config: &Config) -> Self {
        self.shared.inner.lock().waveform = Waveform::new(config.waveform_capacity());
        self
    }

    /// Receive every event from now on, in the order they happen.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.inner.lock().observers.push(tx);
        rx
    }

    pub fn state(&self) -> VoiceState {
        self.shared.inner.lock().state.clone()
    }

    /// Whether a batch capture is running.
    pub fn is_capturing(&self) -> bool {
        self.shared.inner.lock().state == VoiceState::Recording
    }

    /// Whether a batch capture is being transcribed or a stream is open.
    pub fn is_transcribing(&self) -> bool {
        self.shared.inner.lock().state == VoiceState::Transcribing
    }

    pub fn transcript(&self) -> String {
        self.shared.inner.lock().transcript.clone()
    }

    /// Recent amplitudes, oldest first.
    pub fn waveform(&self) -> Vec<f32> {
        self.shared.inner.lock().waveform.snapshot()
    }

    /// The model loaded by the last successful initialize.
    pub fn model(&self) -> Option<ModelId> {
        self.shared.inner.lock().model.clone()
    }

    /// Make sure the optimal model is on device and loaded.
    ///
    /// From `Ready` this only re-emits `Ready`. While a model is already being
    /// provisioned nothing new starts; the call resolves with the outcome of
    /// the attempt in flight.
    pub async fn initialize(&self) -> Result<(), VoiceError> {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.activity == Activity::Provisioning {
                debug!(attempt = inner.attempt, "Model already being provisioned");
                Err((inner.attempt, inner.states.subscribe()))
            } else {
                match inner.state.clone() {
                    VoiceState::Ready => {
                        inner.set_state(VoiceState::Ready);
                        return Ok(());
                    }
                    VoiceState::Idle | VoiceState::Error { .. } => {}
                    VoiceState::DownloadingModel { .. }
                    | VoiceState::PreparingModel
                    | VoiceState::Recording
                    | VoiceState::Transcribing => return Err(inner.not_ready()),
                }
                inner.activity = Activity::Provisioning;
                inner.last_error = None;
                Ok(self.shared.begin_attempt(&mut inner))
            }
        };
        let attempt = match start {
            Ok(attempt) => attempt,
            Err((in_flight, states)) => return self.settled(in_flight, states).await,
        };

        info!(attempt, "Initializing voice session");
        match self.provision(attempt).await {
            Ok(()) => Ok(()),
            Err(VoiceError::Cancelled) => Err(VoiceError::Cancelled),
            Err(e) => Err(self.shared.fail(attempt, e)),
        }
    }

    /// Wait until provisioning `attempt` reaches `Ready` or `Error`. The
    /// state current at subscription predates the outcome and is skipped.
    async fn settled(
        &self,
        attempt: u64,
        mut states: watch::Receiver<VoiceState>,
    ) -> Result<(), VoiceError> {
        let outcome = async {
            loop {
                if states.changed().await.is_err() {
                    return Err(VoiceError::Cancelled);
                }
                let state = states.borrow_and_update().clone();
                match state {
                    VoiceState::Ready => return Ok(()),
                    VoiceState::Error { .. } => {
                        let error = self.shared.inner.lock().last_error.clone();
                        return Err(error.unwrap_or(VoiceError::Cancelled));
                    }
                    _ => {}
                }
            }
        };
        self.shared
            .until_superseded(attempt, outcome)
            .await
            .unwrap_or(Err(VoiceError::Cancelled))
    }

    async fn provision(&self, attempt: u64) -> Result<(), VoiceError> {
        let shared = &self.shared;

        let lookup = async {
            let downloaded = shared.provisioning.list_downloaded().await?;
            let optimal = shared.provisioning.optimal_model().await?;
            Ok::<_, ProvisionError>((downloaded, optimal))
        };
        let (downloaded, model) = shared
            .until_superseded(attempt, lookup)
            .await
            .ok_or(VoiceError::Cancelled)?
            .map_err(VoiceError::provisioning)?;

        if downloaded.contains(&model) {
            info!(attempt, model = %model, "Model already on device");
        } else {
            self.download(attempt, &model).await?;
        }

        shared.transition(attempt, VoiceState::PreparingModel)?;
        shared
            .until_superseded(attempt, shared.engine.prepare(&model))
            .await
            .ok_or(VoiceError::Cancelled)?
            .map_err(VoiceError::provisioning)?;

        shared
            .with_attempt(attempt, |inner| {
                inner.activity = Activity::Idle;
                inner.model = Some(model);
                inner.set_state(VoiceState::Ready);
            })
            .ok_or(VoiceError::Cancelled)
    }

    /// Forward the download progress of `model` as non-decreasing
    /// `DownloadingModel` states until the stream ends.
    async fn download(&self, attempt: u64, model: &ModelId) -> Result<(), VoiceError> {
        let shared = &self.shared;
        let downloading = |progress| VoiceState::DownloadingModel {
            progress,
            model: model.clone(),
        };

        shared.transition(attempt, downloading(0.0))?;
        let mut progress = shared.provisioning.download(model);
        let mut last = 0.0_f32;

        loop {
            let item = shared
                .until_superseded(attempt, progress.next())
                .await
                .ok_or(VoiceError::Cancelled)?;
            match item {
                Some(Ok(p)) => {
                    if p.is_nan() {
                        continue;
                    }
                    let p = p.clamp(0.0, 1.0);
                    if p > last {
                        last = p;
                        shared.transition(attempt, downloading(p))?;
                    }
                }
                Some(Err(e)) => return Err(VoiceError::provisioning(e)),
                None if last >= 1.0 => return Ok(()),
                None => return Err(VoiceError::provisioning(ProvisionError::Interrupted)),
            }
        }
    }

    /// Begin a batch capture. Only legal from `Ready`.
    pub async fn start_recording(&self) -> Result<(), VoiceError> {
        let attempt = {
            let mut inner = self.shared.inner.lock();
            if inner.state != VoiceState::Ready {
                return Err(inner.not_ready());
            }
            let attempt = self.shared.begin_attempt(&mut inner);
            inner.activity = Activity::Starting;
            inner.transcript.clear();
            inner.waveform.clear();
            inner.set_state(VoiceState::Recording);
            attempt
        };

        let shared = &self.shared;
        let levels = match shared
            .until_superseded(attempt, shared.engine.begin_capture())
            .await
        {
            Some(Ok(levels)) => levels,
            Some(Err(e)) => return Err(shared.fail(attempt, VoiceError::transcription(e))),
            None => {
                shared.release_capture().await;
                return Err(VoiceError::Cancelled);
            }
        };

        let forwarder = tokio::spawn(forward_levels(Arc::downgrade(shared), attempt, levels));
        let stored = shared.with_attempt(attempt, |inner| {
            if inner.activity == Activity::Starting {
                inner.activity = Activity::Capturing;
                inner.task = Some(forwarder);
                None
            } else {
                Some(forwarder)
            }
        });
        match stored {
            Some(None) => Ok(()),
            superseded => {
                if let Some(Some(forwarder)) = superseded {
                    forwarder.abort();
                }
                shared.release_capture().await;
                Err(VoiceError::Cancelled)
            }
        }
    }

    /// End the batch capture and transcribe it. Only legal while `Recording`
    /// and once the engine has actually begun capturing.
    pub async fn stop_recording(&self) -> Result<String, VoiceError> {
        let attempt = {
            let mut inner = self.shared.inner.lock();
            if inner.state != VoiceState::Recording || inner.activity != Activity::Capturing {
                return Err(inner.not_ready());
            }
            inner.abort_task();
            inner.activity = Activity::Finishing;
            inner.set_state(VoiceState::Transcribing);
            inner.attempt
        };

        let shared = &self.shared;
        let transcription = async {
            let audio = shared.engine.end_capture().await?;
            info!(
                attempt,
                length_seconds = audio.duration().as_secs_f64(),
                "Capture finished"
            );
            shared.engine.transcribe(audio).await
        };

        match shared.until_superseded(attempt, transcription).await {
            Some(Ok(text)) => shared
                .with_attempt(attempt, |inner| {
                    inner.transcript = text.clone();
                    inner.emit(VoiceEvent::Transcript(text.clone()));
                    inner.activity = Activity::Idle;
                    inner.set_state(VoiceState::Ready);
                    text
                })
                .ok_or(VoiceError::Cancelled),
            Some(Err(e)) => Err(shared.fail(attempt, VoiceError::transcription(e))),
            None => Err(VoiceError::Cancelled),
        }
    }

    /// Begin continuous transcription. Goes straight from `Ready` to
    /// `Transcribing`; there is no `Recording` phase.
    pub async fn start_streaming(&self) -> Result<(), VoiceError> {
        let attempt = {
            let mut inner = self.shared.inner.lock();
            if inner.state != VoiceState::Ready {
                return Err(inner.not_ready());
            }
            let attempt = self.shared.begin_attempt(&mut inner);
            inner.activity = Activity::Streaming;
            inner.transcript.clear();
            inner.set_state(VoiceState::Transcribing);
            attempt
        };

        let shared = &self.shared;
        let texts = match shared
            .until_superseded(attempt, shared.engine.open_stream())
            .await
        {
            Some(Ok(texts)) => texts,
            Some(Err(e)) => return Err(shared.fail(attempt, VoiceError::transcription(e))),
            None => {
                shared.release_stream().await;
                return Err(VoiceError::Cancelled);
            }
        };

        let pump = tokio::spawn(pump_stream(Arc::downgrade(shared), attempt, texts));
        let stored = shared.with_attempt(attempt, |inner| {
            if inner.activity == Activity::Streaming {
                inner.task = Some(pump);
                None
            } else {
                Some(pump)
            }
        });
        match stored {
            Some(None) => Ok(()),
            // The stream already failed and reported it
            Some(Some(pump)) => {
                pump.abort();
                Ok(())
            }
            None => {
                shared.release_stream().await;
                Err(VoiceError::Cancelled)
            }
        }
    }

    /// End continuous transcription and return the accumulated transcript.
    /// Always lands in `Ready`, even if nothing was transcribed.
    pub async fn stop_streaming(&self) -> Result<String, VoiceError> {
        let transcript = {
            let mut inner = self.shared.inner.lock();
            if inner.state != VoiceState::Transcribing || inner.activity != Activity::Streaming {
                return Err(inner.not_ready());
            }
            self.shared.begin_attempt(&mut inner);
            inner.abort_task();
            inner.activity = Activity::Idle;
            inner.set_state(VoiceState::Ready);
            inner.transcript.clone()
        };

        if let Err(e) = self.shared.engine.close_stream().await {
            warn!(error = %e, "Failed to close transcription stream");
        }
        Ok(transcript)
    }

    /// Abort whatever is in flight. Provisioning falls back to `Idle`, a
    /// capture or stream falls back to `Ready` with its audio discarded.
    pub async fn cancel(&self) {
        let activity = {
            let mut inner = self.shared.inner.lock();
            let activity = inner.activity;
            if activity == Activity::Idle {
                return;
            }
            let attempt = self.shared.begin_attempt(&mut inner);
            info!(attempt, ?activity, "Cancelling");
            inner.abort_task();
            inner.activity = Activity::Idle;
            let fallback = match activity {
                Activity::Provisioning => VoiceState::Idle,
                _ => VoiceState::Ready,
            };
            if inner.state != fallback {
                inner.set_state(fallback);
            }
            activity
        };

        match activity {
            Activity::Starting | Activity::Capturing | Activity::Finishing => {
                self.shared.release_capture().await
            }
            Activity::Streaming => self.shared.release_stream().await,
            Activity::Idle | Activity::Provisioning => {}
        }
    }
}

/// Push capture levels into the waveform until the capture ends or the
/// attempt is superseded.
async fn forward_levels(shared: Weak<Shared>, attempt: u64, mut levels: LevelStream) {
    while let Some(level) = levels.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let applied = shared.with_attempt(attempt, |inner| {
            inner.waveform.push(level);
            let snapshot = inner.waveform.snapshot();
            inner.emit(VoiceEvent::Waveform(snapshot));
        });
        if applied.is_none() {
            break;
        }
    }
}

/// Append stream increments to the transcript until the stream ends, fails
/// or the attempt is superseded.
async fn pump_stream(shared: Weak<Shared>, attempt: u64, mut texts: TextStream) {
    while let Some(item) = texts.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match item {
            Ok(increment) => {
                if shared
                    .with_attempt(attempt, |inner| inner.append_transcript(&increment))
                    .is_none()
                {
                    break;
                }
            }
            Err(e) => {
                let failed = shared.with_attempt(attempt, |inner| {
                    // Detach our own handle so failing does not abort this task.
                    inner.task.take();
                    inner.fail(VoiceError::transcription(e));
                });
                if failed.is_some() {
                    shared.release_stream().await;
                }
                break;
            }
        }
    }
}
