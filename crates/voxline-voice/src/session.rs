//! Per-client streaming recognition session.

use crate::config::RecognizerConfig;
use crate::error::VoiceError;
use crate::recognizer::{RecognitionResult, Recognizer, RecognizerStream, StreamingConfig};
use crate::until_cancelled;
use bytes::Bytes;
use futures_util::StreamExt;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voxline_bus::EventBus;
use voxline_types::{pcm_bytes_to_ms, ClientId, Event};

/// Lifecycle of a [`RecognitionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of the ingestion queue, in chunks. A full queue makes
    /// [`RecognitionSession::push`] wait.
    pub queue_capacity: usize,
    /// How long [`RecognitionSession::stop`] waits for queued audio and
    /// trailing results before cancelling.
    pub drain_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RecognizerConfig::default())
    }
}

impl From<&RecognizerConfig> for SessionSettings {
    fn from(config: &RecognizerConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            drain_timeout: config.drain_timeout(),
        }
    }
}

enum Ingest {
    Audio(Bytes),
    EndOfStream,
}

type SharedState = Arc<Mutex<SessionState>>;

fn read_state(state: &SharedState) -> SessionState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_state(state: &SharedState, next: SessionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Streams one client's audio to a [`Recognizer`] and publishes the
/// transcripts it returns as `transcript.partial` / `transcript.final`.
///
/// Audio pushed through [`push`](Self::push) is forwarded in FIFO order by a
/// single background task, which also reads recognizer responses. The
/// session never subscribes to the bus itself; whoever owns it routes
/// `client.audio` events into `push`.
pub struct RecognitionSession {
    client_id: ClientId,
    config: StreamingConfig,
    settings: SessionSettings,
    recognizer: Arc<dyn Recognizer>,
    bus: EventBus,
    state: SharedState,
    ingest_tx: mpsc::Sender<Ingest>,
    ingest_rx: Mutex<Option<mpsc::Receiver<Ingest>>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionSession {
    pub fn new(
        client_id: ClientId,
        config: StreamingConfig,
        settings: SessionSettings,
        recognizer: Arc<dyn Recognizer>,
        bus: EventBus,
    ) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(settings.queue_capacity.max(1));
        Self {
            client_id,
            config,
            settings,
            recognizer,
            bus,
            state: Arc::new(Mutex::new(SessionState::Created)),
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        read_state(&self.state)
    }

    /// Whether the background task exists and has not finished.
    pub async fn is_task_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Opens the recognizer stream and spawns the forwarding task.
    ///
    /// # Errors
    ///
    /// - [`VoiceError::InvalidState`] unless the session is `Created`.
    /// - Whatever the recognizer returned if the connection failed; the
    ///   session is then `Stopped`.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let mut task = self.task.lock().await;

        let current = self.state();
        if current != SessionState::Created {
            return Err(VoiceError::InvalidState(format!(
                "cannot start a {} session",
                current
            )));
        }
        let rx = self
            .ingest_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| VoiceError::InvalidState("session already started".to_string()))?;

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VoiceError::Cancelled),
            result = self.recognizer.connect(&self.config) => result,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                write_state(&self.state, SessionState::Stopped);
                tracing::error!(client_id = %self.client_id, "recognizer connection failed: {}", e);
                return Err(e);
            }
        };

        write_state(&self.state, SessionState::Streaming);
        tracing::info!(
            client_id = %self.client_id,
            language = ?self.config.language_codes,
            "recognition session started"
        );

        let worker = Worker {
            client_id: self.client_id,
            bus: self.bus.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };
        *task = Some(tokio::spawn(worker.run(rx, stream)));
        Ok(())
    }

    /// Queues an audio chunk for the recognizer.
    ///
    /// Waits while the queue is full. Returns `false` without queueing once
    /// the session is stopping, stopped, or its task has ended.
    pub async fn push(&self, chunk: Bytes) -> bool {
        if !matches!(
            self.state(),
            SessionState::Created | SessionState::Streaming
        ) {
            return false;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.ingest_tx.send(Ingest::Audio(chunk)) => sent.is_ok(),
        }
    }

    /// Ends the session: lets queued audio drain into the recognizer, reads
    /// the trailing results, then tears the task down.
    ///
    /// The drain is bounded by [`SessionSettings::drain_timeout`]; after
    /// that the task is cancelled. A session stopped before it started goes
    /// straight to `Stopped` and can no longer be started. A second call does
    /// nothing.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(mut handle) = task.take() else {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Created {
                *state = SessionState::Stopped;
                self.cancel.cancel();
                tracing::debug!(client_id = %self.client_id, "recognition session stopped before start");
            }
            return;
        };

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Streaming {
                *state = SessionState::Stopping;
            }
        }

        let ingest_tx = self.ingest_tx.clone();
        let graceful = async {
            // Fails only when the task is already gone.
            let _ = ingest_tx.send(Ingest::EndOfStream).await;
            (&mut handle).await
        };
        let drained = tokio::time::timeout(self.settings.drain_timeout, graceful)
            .await
            .ok();

        let joined = match drained {
            Some(joined) => joined,
            None => {
                tracing::warn!(
                    client_id = %self.client_id,
                    timeout_ms = self.settings.drain_timeout.as_millis() as u64,
                    "recognition drain timed out, cancelling"
                );
                self.cancel.cancel();
                handle.await
            }
        };
        if let Err(e) = joined {
            tracing::error!(client_id = %self.client_id, "recognition task failed: {}", e);
        }

        self.cancel.cancel();
        write_state(&self.state, SessionState::Stopped);
        tracing::info!(client_id = %self.client_id, "recognition session stopped");
    }
}

impl fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// State owned by the background task.
struct Worker {
    client_id: ClientId,
    bus: EventBus,
    state: SharedState,
    cancel: CancellationToken,
}

enum Exit {
    Finished,
    Cancelled,
    Failed(VoiceError),
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Ingest>, stream: RecognizerStream) {
        let RecognizerStream {
            mut sink,
            mut responses,
        } = stream;
        let mut tracker = UtteranceTracker::default();
        let mut forwarded_bytes: u64 = 0;
        let mut input_open = true;

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                item = rx.recv(), if input_open => match item {
                    Some(Ingest::Audio(chunk)) => {
                        let len = chunk.len() as u64;
                        match self.guarded(sink.send_audio(chunk)).await {
                            Some(Ok(())) => forwarded_bytes += len,
                            Some(Err(e)) => break Exit::Failed(e),
                            None => break Exit::Cancelled,
                        }
                    }
                    Some(Ingest::EndOfStream) | None => {
                        input_open = false;
                        rx.close();
                        match self.guarded(sink.finish()).await {
                            Some(Ok(())) => {}
                            Some(Err(e)) => break Exit::Failed(e),
                            None => break Exit::Cancelled,
                        }
                    }
                },
                response = responses.next() => match response {
                    Some(Ok(response)) => {
                        let audio_ms = pcm_bytes_to_ms(forwarded_bytes);
                        for result in response.results {
                            let Some(event) = tracker.observe(self.client_id, result, audio_ms) else {
                                continue;
                            };
                            if self.guarded(self.publish(event)).await.is_none() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => break Exit::Failed(e),
                    None if input_open => {
                        break Exit::Failed(VoiceError::Recognizer(
                            "stream closed unexpectedly".to_string(),
                        ));
                    }
                    None => break Exit::Finished,
                },
            }
        };

        match exit {
            Exit::Finished => {
                tracing::debug!(client_id = %self.client_id, "recognizer stream drained");
                write_state(&self.state, SessionState::Stopped);
            }
            Exit::Cancelled => {
                tracing::debug!(client_id = %self.client_id, "recognition task cancelled");
            }
            Exit::Failed(e) => {
                tracing::error!(client_id = %self.client_id, "recognition failed: {}", e);
                write_state(&self.state, SessionState::Stopped);
                self.cancel.cancel();
            }
        }
    }

    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        until_cancelled(&self.cancel, fut).await
    }

    async fn publish(&self, event: Event) {
        let topic = event.topic();
        if let Err(e) = self.bus.publish(topic, event).await {
            tracing::debug!(client_id = %self.client_id, topic = %topic, "transcript delivery incomplete: {}", e);
        }
    }
}

/// Derives utterance offsets and filters noise out of the raw result stream.
#[derive(Debug, Default)]
struct UtteranceTracker {
    utterance_start_ms: u64,
    last_final: Option<String>,
}

impl UtteranceTracker {
    /// Turns one recognizer result into a transcript event, or `None` when
    /// it carries nothing new: empty text, or an interim that merely repeats
    /// the transcript just finalized.
    fn observe(
        &mut self,
        client_id: ClientId,
        result: RecognitionResult,
        audio_ms: u64,
    ) -> Option<Event> {
        let text = result.transcript.trim();
        if text.is_empty() {
            return None;
        }

        if !result.is_final {
            if self.last_final.as_deref() == Some(text) {
                return None;
            }
            self.last_final = None;
        }

        let start_ms = result.start_ms.unwrap_or(self.utterance_start_ms);
        let end_ms = result.end_ms.unwrap_or(audio_ms).max(start_ms);

        if result.is_final {
            self.utterance_start_ms = end_ms;
            self.last_final = Some(text.to_string());
        }

        Some(Event::transcript(
            client_id,
            text,
            result.is_final,
            start_ms,
            end_ms,
        ))
    }
}
