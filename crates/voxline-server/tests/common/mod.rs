#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use voxline_server::config::Config;
use voxline_server::{app, build_state, AppState};
use voxline_voice::{
    AudioSink, AudioStream, RecognitionResponse, RecognitionResult, Recognizer, RecognizerStream,
    SpeechSynthesizer, StreamingConfig, VoiceError,
};

pub const PARTIAL: &str = "tere";
pub const FINAL: &str = "tere kuidas läheb";

/// Recognizer that answers the first audio chunk with an interim result and
/// `finish` with a final one.
#[derive(Clone, Default)]
pub struct MockRecognizer {
    pub fail_connect: bool,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl MockRecognizer {
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn connect(&self, config: &StreamingConfig) -> Result<RecognizerStream, VoiceError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connect:{}", config.language_codes.join(",")));
        if self.fail_connect {
            return Err(VoiceError::Recognizer("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let responses = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(RecognizerStream {
            sink: Box::new(MockSink {
                tx: Some(tx),
                log: self.log.clone(),
                sent: 0,
            }),
            responses,
        })
    }
}

struct MockSink {
    tx: Option<mpsc::UnboundedSender<Result<RecognitionResponse, VoiceError>>>,
    log: Arc<Mutex<Vec<String>>>,
    sent: usize,
}

#[async_trait]
impl AudioSink for MockSink {
    async fn send_audio(&mut self, _chunk: Bytes) -> Result<(), VoiceError> {
        self.sent += 1;
        if self.sent == 1 {
            if let Some(tx) = &self.tx {
                let _ = tx.send(Ok(RecognitionResult::interim(PARTIAL).into()));
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.log.lock().unwrap().push("finish".to_string());
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(RecognitionResult::final_result(FINAL).into()));
        }
        Ok(())
    }
}

/// Synthesizer whose audio for a text is `<text>`.
#[derive(Default)]
pub struct EchoSynthesizer {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        self.calls.lock().unwrap().push(text.to_string());
        let audio = Bytes::from(format!("<{}>", text));
        Ok(stream::iter(vec![Ok(audio)]).boxed())
    }
}

pub fn test_state(recognizer: MockRecognizer) -> AppState {
    build_state(
        Config::default(),
        Arc::new(recognizer),
        Arc::new(EchoSynthesizer::default()),
    )
    .unwrap()
}

/// Serves the app on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}
