#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use voxline_bus::{handler_fn, EventBus};
use voxline_types::{Event, Topic, Transcript};
use voxline_voice::{
    AudioSink, AudioStream, RecognitionResponse, RecognitionResult, Recognizer, RecognizerStream,
    SpeechSynthesizer, StreamingConfig, VoiceError,
};

// ── recognizer ───────────────────────────────────────────────────────

/// What the scripted recognizer does over one stream.
#[derive(Clone, Default)]
pub struct Script {
    /// Interim transcript sent right after the first audio chunk.
    pub partial_after_first: Option<String>,
    /// Final transcript sent when input is finished.
    pub final_on_finish: Option<String>,
    /// Report an upstream error right after the first audio chunk.
    pub fail_after_first: bool,
    pub fail_connect: bool,
    /// Keep the response stream open after `finish`.
    pub hang_on_finish: bool,
    /// When set, every `send_audio` waits for a permit after recording.
    pub gate: Option<Arc<Semaphore>>,
}

#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    pub script: Script,
    pub log: Arc<Mutex<Vec<String>>>,
    pub chunks: Arc<Mutex<Vec<Bytes>>>,
    pub configs: Arc<Mutex<Vec<StreamingConfig>>>,
}

impl ScriptedRecognizer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn connect(&self, config: &StreamingConfig) -> Result<RecognizerStream, VoiceError> {
        self.log.lock().unwrap().push("connect".to_string());
        self.configs.lock().unwrap().push(config.clone());

        if self.script.fail_connect {
            return Err(VoiceError::Recognizer("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let responses = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(RecognizerStream {
            sink: Box::new(ScriptedSink {
                tx: Some(tx),
                script: self.script.clone(),
                log: self.log.clone(),
                chunks: self.chunks.clone(),
                sent: 0,
            }),
            responses,
        })
    }
}

type ResponseTx = mpsc::UnboundedSender<Result<RecognitionResponse, VoiceError>>;

struct ScriptedSink {
    tx: Option<ResponseTx>,
    script: Script,
    log: Arc<Mutex<Vec<String>>>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    sent: usize,
}

impl ScriptedSink {
    fn respond(&self, response: Result<RecognitionResponse, VoiceError>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(response);
        }
    }
}

#[async_trait]
impl AudioSink for ScriptedSink {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), VoiceError> {
        self.chunks.lock().unwrap().push(chunk);
        if let Some(gate) = &self.script.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.sent += 1;
        if self.sent == 1 {
            if let Some(text) = &self.script.partial_after_first {
                self.respond(Ok(RecognitionResult::interim(text.clone()).into()));
            }
            if self.script.fail_after_first {
                self.respond(Err(VoiceError::Recognizer("upstream reset".to_string())));
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.log.lock().unwrap().push("finish".to_string());
        if let Some(text) = &self.script.final_on_finish {
            self.respond(Ok(RecognitionResult::final_result(text.clone()).into()));
        }
        if !self.script.hang_on_finish {
            self.tx = None;
        }
        Ok(())
    }
}

// ── synthesizer ──────────────────────────────────────────────────────

/// In-memory synthesizer with per-text latency and failure injection.
///
/// The audio for a text is `<text>`, streamed in 3-byte pieces.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub delays: HashMap<String, Duration>,
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, text: &str, millis: u64) -> Self {
        self.delays
            .insert(text.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn fail(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

pub fn audio_for(text: &str) -> Vec<u8> {
    format!("<{}>", text).into_bytes()
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        self.calls.lock().unwrap().push(text.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().unwrap().push(text.to_string());

        if self.failing.contains(text) {
            return Err(VoiceError::Synthesis("403 (gated): voice unavailable".to_string()));
        }

        let pieces: Vec<Result<Bytes, VoiceError>> = audio_for(text)
            .chunks(3)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }
}

// ── bus recorder ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Chunk(Bytes),
    End(String),
}

/// Subscribes to the output topics and records what reaches the bus.
#[derive(Clone, Default)]
pub struct Recorder {
    pub emitted: Arc<Mutex<Vec<Emitted>>>,
    pub transcripts: Arc<Mutex<Vec<Transcript>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();

        let emitted = recorder.emitted.clone();
        let audio = handler_fn("recorder-audio", move |event: Event| {
            let emitted = emitted.clone();
            async move {
                match event {
                    Event::AudioChunk(chunk) => emitted.lock().unwrap().push(Emitted::Chunk(chunk.chunk)),
                    Event::AudioEnd(end) => emitted.lock().unwrap().push(Emitted::End(end.trace_id)),
                    _ => {}
                }
                Ok(())
            }
        });
        bus.subscribe(Topic::AudioChunk, audio.clone()).unwrap();
        bus.subscribe(Topic::AudioEnd, audio).unwrap();

        let transcripts = recorder.transcripts.clone();
        let text = handler_fn("recorder-transcripts", move |event: Event| {
            let transcripts = transcripts.clone();
            async move {
                if let Event::TranscriptPartial(t) | Event::TranscriptFinal(t) = event {
                    transcripts.lock().unwrap().push(t);
                }
                Ok(())
            }
        });
        bus.subscribe(Topic::TranscriptPartial, text.clone()).unwrap();
        bus.subscribe(Topic::TranscriptFinal, text).unwrap();

        recorder
    }

    pub fn emitted(&self) -> Vec<Emitted> {
        self.emitted.lock().unwrap().clone()
    }

    /// All chunk bytes concatenated in emission order.
    pub fn audio(&self) -> Vec<u8> {
        self.emitted()
            .into_iter()
            .filter_map(|e| match e {
                Emitted::Chunk(bytes) => Some(bytes.to_vec()),
                Emitted::End(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn ends(&self) -> Vec<String> {
        self.emitted()
            .into_iter()
            .filter_map(|e| match e {
                Emitted::End(trace) => Some(trace),
                Emitted::Chunk(_) => None,
            })
            .collect()
    }

    pub fn transcripts(&self) -> Vec<Transcript> {
        self.transcripts.lock().unwrap().clone()
    }
}
