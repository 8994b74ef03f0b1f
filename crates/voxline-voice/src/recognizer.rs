//! Streaming speech recognizer abstraction and its WebSocket client.
//!
//! A recognizer connection is two halves: an [`AudioSink`] that accepts raw
//! PCM chunks and an end-of-input signal, and a stream of
//! [`RecognitionResponse`]s carrying interim and final hypotheses.
//!
//! Wire protocol spoken by [`WsRecognizer`]:
//!
//! | Direction | Frame  | Content                                    |
//! |-----------|--------|--------------------------------------------|
//! | out       | text   | [`StreamingConfig`] as JSON (first frame)  |
//! | out       | binary | 16-bit LE mono PCM                         |
//! | out       | text   | `{"type":"end_of_stream"}`                 |
//! | in        | text   | `{"results":[...]}` or `{"error":"..."}`   |

use crate::config::RecognizerConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Parameters sent once when a recognition stream opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub encoding: String,
    pub sample_rate_hz: u32,
    pub channels: u32,
    pub language_codes: Vec<String>,
    pub model: String,
    pub interim_results: bool,
}

/// One hypothesis inside a recognizer response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub transcript: String,
    #[serde(default)]
    pub is_final: bool,
    /// Utterance offsets relative to the start of the stream, when the
    /// recognizer reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
            start_ms: None,
            end_ms: None,
        }
    }

    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::interim(transcript)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub results: Vec<RecognitionResult>,
}

impl From<RecognitionResult> for RecognitionResponse {
    fn from(result: RecognitionResult) -> Self {
        Self {
            results: vec![result],
        }
    }
}

/// Write half of a recognition stream.
#[async_trait]
pub trait AudioSink: Send {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), VoiceError>;

    /// Signals that no more audio follows. The recognizer is expected to
    /// flush its final results and then close the response stream.
    async fn finish(&mut self) -> Result<(), VoiceError>;
}

pub type ResponseStream = BoxStream<'static, Result<RecognitionResponse, VoiceError>>;

/// An open recognition stream.
pub struct RecognizerStream {
    pub sink: Box<dyn AudioSink>,
    pub responses: ResponseStream,
}

/// Opens streaming recognition sessions against some backend.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn connect(&self, config: &StreamingConfig) -> Result<RecognizerStream, VoiceError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerMessage {
    Error { error: String },
    Results(RecognitionResponse),
}

/// [`Recognizer`] speaking the JSON-over-WebSocket protocol described in the
/// module docs.
#[derive(Debug, Clone)]
pub struct WsRecognizer {
    url: String,
    api_key: String,
    connect_timeout: Duration,
}

impl WsRecognizer {
    pub fn new(config: &RecognizerConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Recognizer for WsRecognizer {
    async fn connect(&self, config: &StreamingConfig) -> Result<RecognizerStream, VoiceError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Recognizer(format!("invalid recognizer url: {}", e)))?;

        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| VoiceError::Config(format!("invalid recognizer api key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws, _response) = match tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                return Err(VoiceError::Recognizer(format!("connection failed: {}", e)));
            }
            Err(_) => {
                return Err(VoiceError::Recognizer(format!(
                    "connection timed out after {}ms",
                    self.connect_timeout.as_millis()
                )));
            }
        };

        let (mut sink, stream) = ws.split();

        let first = serde_json::to_string(config)
            .map_err(|e| VoiceError::Recognizer(format!("failed to encode config: {}", e)))?;
        sink.send(Message::Text(first.into()))
            .await
            .map_err(|e| VoiceError::Recognizer(format!("failed to send config: {}", e)))?;

        tracing::debug!(url = %self.url, model = %config.model, "recognizer stream opened");

        let responses = stream
            .take_while(|msg| futures_util::future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| futures_util::future::ready(decode_message(msg)))
            .boxed();

        Ok(RecognizerStream {
            sink: Box::new(WsAudioSink { sink }),
            responses,
        })
    }
}

fn decode_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<RecognitionResponse, VoiceError>> {
    let msg = match msg {
        Ok(msg) => msg,
        Err(e) => return Some(Err(VoiceError::Recognizer(format!("read failed: {}", e)))),
    };

    match msg {
        Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(ServerMessage::Results(response)) => Some(Ok(response)),
            Ok(ServerMessage::Error { error }) => Some(Err(VoiceError::Recognizer(error))),
            Err(e) => {
                tracing::warn!("ignoring malformed recognizer message: {}", e);
                None
            }
        },
        _ => None,
    }
}

struct WsAudioSink {
    sink: WsSink,
}

#[async_trait]
impl AudioSink for WsAudioSink {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), VoiceError> {
        self.sink
            .send(Message::Binary(chunk))
            .await
            .map_err(|e| VoiceError::Recognizer(format!("failed to send audio: {}", e)))
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.sink
            .send(Message::Text(r#"{"type":"end_of_stream"}"#.into()))
            .await
            .map_err(|e| VoiceError::Recognizer(format!("failed to send end of stream: {}", e)))
    }
}
