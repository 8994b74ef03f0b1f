//! Ordered, bounded-parallel synthesis of response text.
//!
//! Long responses are split into segments whose audio is fetched
//! concurrently (at most `max_concurrency` at a time) and emitted strictly in
//! segment order: segment `i + 1` may finish first, but its frames are held
//! until every frame of segment `i` has been published. Short responses skip
//! segmentation and stream straight through a single fetch.
//!
//! Every utterance ends with `audio.end` unless it failed or was cancelled.

use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::frames::{split_frames, FrameBuffer};
use crate::segment::{is_short_text, split_segments, Segment};
use crate::synthesis::SpeechSynthesizer;
use crate::until_cancelled;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voxline_bus::{handler_fn, EventBus, EventHandler};
use voxline_types::{AudioChunk, AudioEnd, ClientId, Event, ResponseText, Topic};

/// One response to be spoken to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub client_id: ClientId,
    pub trace_id: String,
    pub text: String,
}

impl From<ResponseText> for SynthesisRequest {
    fn from(event: ResponseText) -> Self {
        Self {
            client_id: event.client_id,
            trace_id: event.trace_id,
            text: event.text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchSettings {
    pub max_concurrency: usize,
    pub frame_bytes: usize,
    pub short_text_chars: usize,
    pub max_segment_chars: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self::from(&SynthesisConfig::default())
    }
}

impl From<&SynthesisConfig> for PrefetchSettings {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            frame_bytes: config.frame_bytes,
            short_text_chars: config.short_text_chars,
            max_segment_chars: config.max_segment_chars,
        }
    }
}

struct InFlight {
    trace_id: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), VoiceError>>,
}

impl InFlight {
    /// Cancels the request and waits until its emission task and every fetch
    /// task it spawned have ended.
    async fn teardown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(trace_id = %self.trace_id, "synthesis task failed: {}", e);
        }
    }
}

/// A client's in-flight request. Locked across teardown, so it serializes
/// submissions for one client without holding up any other client.
type Slot = Arc<Mutex<Option<InFlight>>>;

/// Synthesizes `response.text` events into ordered `audio.chunk` frames.
///
/// At most one request per client is in flight. Submitting a newer request
/// for a client tears the previous one down (cancel, then await) before the
/// new request starts, so the client never receives interleaved audio.
pub struct OrderedPrefetchSynthesizer {
    pipeline: Pipeline,
    slots: std::sync::Mutex<HashMap<ClientId, Slot>>,
}

impl OrderedPrefetchSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        bus: EventBus,
        settings: PrefetchSettings,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                synthesizer,
                bus,
                settings,
            },
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ClientId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, client_id: ClientId) -> Slot {
        self.slots().entry(client_id).or_default().clone()
    }

    fn existing_slot(&self, client_id: ClientId) -> Option<Slot> {
        self.slots().get(&client_id).cloned()
    }

    /// Starts synthesizing `request`, superseding the client's previous
    /// request if it is still running. Returns once the new request's task
    /// has been spawned.
    pub async fn submit(&self, request: SynthesisRequest) {
        let slot = self.slot(request.client_id);
        let mut current = slot.lock().await;

        if let Some(previous) = current.take() {
            if !previous.task.is_finished() {
                tracing::info!(
                    client_id = %request.client_id,
                    superseded = %previous.trace_id,
                    trace_id = %request.trace_id,
                    "superseding in-flight synthesis"
                );
            }
            previous.teardown().await;
        }

        let cancel = CancellationToken::new();
        let trace_id = request.trace_id.clone();
        let task = tokio::spawn(self.pipeline.clone().run(request, cancel.clone()));

        *current = Some(InFlight {
            trace_id,
            cancel,
            task,
        });
    }

    /// Cancels the client's in-flight request, if any, and waits for it to
    /// wind down. Returns whether there was one. The client's slot is
    /// forgotten afterwards.
    pub async fn cancel(&self, client_id: ClientId) -> bool {
        let Some(slot) = self.slots().remove(&client_id) else {
            return false;
        };
        let entry = slot.lock().await.take();
        match entry {
            Some(entry) => {
                entry.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Waits for the client's current request to finish and returns its
    /// outcome, or `None` when nothing is tracked for the client.
    pub async fn join(&self, client_id: ClientId) -> Option<Result<(), VoiceError>> {
        let slot = self.existing_slot(client_id)?;
        let entry = slot.lock().await.take()?;
        match entry.task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(Err(VoiceError::Synthesis(format!(
                "synthesis task failed: {}",
                e
            )))),
        }
    }

    /// Whether the client has a request that is still running.
    pub async fn is_active(&self, client_id: ClientId) -> bool {
        let Some(slot) = self.existing_slot(client_id) else {
            return false;
        };
        let current = slot.lock().await;
        current
            .as_ref()
            .is_some_and(|entry| !entry.task.is_finished())
    }

    /// Synthesizes `request` on the calling task, bypassing the per-client
    /// bookkeeping. Cancelling `cancel` aborts it.
    pub async fn synthesize(
        &self,
        request: SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<(), VoiceError> {
        self.pipeline.clone().run(request, cancel).await
    }

    /// A bus handler that submits every `response.text` event.
    pub fn handler(self: &Arc<Self>) -> Arc<dyn EventHandler> {
        let synthesizer = Arc::clone(self);
        handler_fn("prefetch-synthesizer", move |event: Event| {
            let synthesizer = synthesizer.clone();
            async move {
                if let Event::ResponseText(response) = event {
                    synthesizer.submit(response.into()).await;
                }
                Ok(())
            }
        })
    }
}

impl std::fmt::Debug for OrderedPrefetchSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedPrefetchSynthesizer")
            .field("settings", &self.pipeline.settings)
            .finish()
    }
}

/// Everything one synthesis run needs, cheap to clone into a task.
#[derive(Clone)]
struct Pipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    bus: EventBus,
    settings: PrefetchSettings,
}

impl Pipeline {
    async fn run(self, request: SynthesisRequest, cancel: CancellationToken) -> Result<(), VoiceError> {
        let started = Instant::now();
        let text = request.text.trim();

        let outcome = if text.is_empty() {
            Ok(())
        } else if is_short_text(text, self.settings.short_text_chars) {
            tracing::debug!(client_id = %request.client_id, trace_id = %request.trace_id, "synthesizing short response");
            self.single_fetch(&request, text, &cancel).await
        } else {
            let segments = split_segments(text, self.settings.max_segment_chars);
            tracing::debug!(
                client_id = %request.client_id,
                trace_id = %request.trace_id,
                segments = segments.len(),
                "synthesizing segmented response"
            );
            self.prefetch(&request, segments, &cancel).await
        };

        match outcome {
            Ok(()) if !cancel.is_cancelled() => {
                self.publish_end(&request, &cancel).await;
                tracing::info!(
                    client_id = %request.client_id,
                    trace_id = %request.trace_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "response audio complete"
                );
                Ok(())
            }
            Ok(()) | Err(VoiceError::Cancelled) => {
                tracing::debug!(client_id = %request.client_id, trace_id = %request.trace_id, "synthesis cancelled");
                Err(VoiceError::Cancelled)
            }
            Err(e) => {
                tracing::error!(
                    client_id = %request.client_id,
                    trace_id = %request.trace_id,
                    "synthesis failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Streams one fetch straight through, re-chunked to frame size.
    async fn single_fetch(
        &self,
        request: &SynthesisRequest,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), VoiceError> {
        let mut stream = until_cancelled(cancel, self.synthesizer.stream(text))
            .await
            .ok_or(VoiceError::Cancelled)??;
        let mut frames = FrameBuffer::new(self.settings.frame_bytes);

        while let Some(chunk) = until_cancelled(cancel, stream.next())
            .await
            .ok_or(VoiceError::Cancelled)?
        {
            for frame in frames.push(&chunk?) {
                self.emit(request, frame, cancel).await?;
            }
        }
        if let Some(rest) = frames.finish() {
            self.emit(request, rest, cancel).await?;
        }
        Ok(())
    }

    /// Fetches all segments concurrently and emits them in index order.
    ///
    /// The first failed fetch aborts the whole utterance at once: sibling
    /// fetches are cancelled and nothing more is emitted, even for segments
    /// ahead of the failed one.
    async fn prefetch(
        &self,
        request: &SynthesisRequest,
        segments: Vec<Segment>,
        cancel: &CancellationToken,
    ) -> Result<(), VoiceError> {
        let abort = cancel.child_token();
        let failure: Arc<std::sync::Mutex<Option<VoiceError>>> = Arc::default();
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut ready = Vec::with_capacity(segments.len());
        let mut fetches = Vec::with_capacity(segments.len());

        for segment in segments {
            let (tx, rx) = oneshot::channel();
            ready.push(rx);

            let synthesizer = self.synthesizer.clone();
            let permits = permits.clone();
            let abort = abort.clone();
            let failure = failure.clone();
            let trace_id = request.trace_id.clone();
            fetches.push(tokio::spawn(async move {
                let fetched = until_cancelled(&abort, async {
                    match permits.acquire().await {
                        Ok(_permit) => synthesizer.fetch(&segment.text).await,
                        Err(_) => Err(VoiceError::Cancelled),
                    }
                })
                .await;

                match fetched {
                    Some(Ok(audio)) => {
                        // The emitter may already have given up on this segment.
                        let _ = tx.send(audio);
                    }
                    Some(Err(VoiceError::Cancelled)) | None => {}
                    Some(Err(e)) => {
                        tracing::warn!(trace_id = %trace_id, segment = segment.index, "segment fetch failed: {}", e);
                        failure
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get_or_insert(e);
                        abort.cancel();
                    }
                }
            }));
        }

        let emitted = self.emit_in_order(request, ready, &abort).await;

        abort.cancel();
        for fetch in fetches {
            if let Err(e) = fetch.await {
                tracing::error!(trace_id = %request.trace_id, "segment fetch task failed: {}", e);
            }
        }

        match emitted {
            Err(VoiceError::Cancelled) if !cancel.is_cancelled() => {
                let failed = failure.lock().unwrap_or_else(PoisonError::into_inner).take();
                Err(failed.unwrap_or_else(|| {
                    VoiceError::Synthesis("segment fetch ended without a result".to_string())
                }))
            }
            other => other,
        }
    }

    /// Emits each segment once its audio arrives. Returns `Cancelled` as soon
    /// as `abort` fires, whether from outside or from a failed fetch.
    async fn emit_in_order(
        &self,
        request: &SynthesisRequest,
        ready: Vec<oneshot::Receiver<Bytes>>,
        abort: &CancellationToken,
    ) -> Result<(), VoiceError> {
        for (index, rx) in ready.into_iter().enumerate() {
            let audio = match until_cancelled(abort, rx).await {
                Some(Ok(audio)) => audio,
                Some(Err(_)) | None => return Err(VoiceError::Cancelled),
            };

            tracing::trace!(trace_id = %request.trace_id, segment = index, bytes = audio.len(), "emitting segment");
            for frame in split_frames(&audio, self.settings.frame_bytes) {
                self.emit(request, frame, abort).await?;
            }
        }
        Ok(())
    }

    async fn emit(
        &self,
        request: &SynthesisRequest,
        frame: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), VoiceError> {
        let event = Event::AudioChunk(AudioChunk {
            chunk: frame,
            client_id: request.client_id,
        });
        match until_cancelled(cancel, self.bus.publish(Topic::AudioChunk, event)).await {
            None => Err(VoiceError::Cancelled),
            Some(Err(e)) => {
                tracing::debug!(trace_id = %request.trace_id, "audio frame delivery incomplete: {}", e);
                Ok(())
            }
            Some(Ok(())) => Ok(()),
        }
    }

    async fn publish_end(&self, request: &SynthesisRequest, cancel: &CancellationToken) {
        let event = Event::AudioEnd(AudioEnd {
            trace_id: request.trace_id.clone(),
            client_id: request.client_id,
        });
        if let Some(Err(e)) = until_cancelled(cancel, self.bus.publish(Topic::AudioEnd, event)).await {
            tracing::debug!(trace_id = %request.trace_id, "audio end delivery incomplete: {}", e);
        }
    }
}
