use crate::registry::OutboundFrame;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use voxline_types::{new_trace_id, ClientAudio, ClientId, Event, ResponseText, Topic};
use voxline_voice::{RecognitionSession, SessionSettings};

/// Capacity of each connection's outbound frame queue. Once it is full,
/// transcripts are dropped and response audio waits for space.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Maximum allowed length for a `{"text": ...}` frame (4 KiB).
const MAX_RESPONSE_TEXT_LEN: usize = 4_096;

/// Recognition control frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Starts recognition, replacing any running session.
    SttInit {
        #[serde(default)]
        language: Option<String>,
    },
    SttStop,
}

/// Inbound text frames.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Control(ControlMessage),
    /// Text to be spoken back to this client.
    Respond { text: String },
}

/// Outbound JSON frames carrying a `type` tag.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Transcript {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    Error {
        message: String,
    },
}

/// Marks the end of one spoken response.
#[derive(Debug, Serialize)]
pub struct AudioEndMessage {
    #[serde(rename = "isFinal")]
    pub is_final: bool,
}

/// Translates a bus event into the frame sent to its client.
///
/// Returns `None` for events that are not forwarded to clients.
pub fn outbound_frame(event: &Event) -> Option<OutboundFrame> {
    let json = match event {
        Event::AudioChunk(audio) => return Some(OutboundFrame::Binary(audio.chunk.clone())),
        Event::AudioEnd(_) => serde_json::to_string(&AudioEndMessage { is_final: true }),
        Event::TranscriptPartial(t) | Event::TranscriptFinal(t) => {
            serde_json::to_string(&OutgoingMessage::Transcript {
                text: t.text.clone(),
                is_final: t.is_final,
            })
        }
        Event::ClientAudio(_) | Event::ResponseText(_) => return None,
    };

    match json {
        Ok(json) => Some(OutboundFrame::Text(json)),
        Err(e) => {
            tracing::error!(topic = %event.topic(), "failed to serialize outbound frame: {}", e);
            None
        }
    }
}

fn send_ws_error(tx: &mpsc::Sender<OutboundFrame>, message: String) {
    match serde_json::to_string(&OutgoingMessage::Error { message }) {
        Ok(json) => {
            if let Err(e) = tx.try_send(OutboundFrame::Text(json)) {
                tracing::warn!("failed to send WebSocket error to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize WebSocket error message: {}", e);
        }
    }
}

/// WebSocket upgrade handler for `GET /ws/{client_id}`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let client_id: ClientId = match client_id.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(client_id = %client_id, "rejecting websocket with invalid client id: {}", e);
            return (StatusCode::BAD_REQUEST, "client id must be a UUID").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

/// Handles one client connection until it closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: ClientId) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_CAPACITY);

    let connection_id = state.registry.add_connection(client_id, tx.clone()).await;
    tracing::info!(client_id = %client_id, connection_id = %connection_id, "client connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                OutboundFrame::Binary(bytes) => AxumMessage::Binary(bytes),
                OutboundFrame::Text(text) => AxumMessage::Text(text.into()),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Binary(chunk) => {
                let event = Event::ClientAudio(ClientAudio { chunk, client_id });
                if let Err(e) = state.bus.publish(Topic::ClientAudio, event).await {
                    tracing::warn!(client_id = %client_id, "audio delivery failed: {}", e);
                }
            }
            AxumMessage::Text(text) => {
                match serde_json::from_str::<IncomingMessage>(text.as_str()) {
                    Ok(incoming) => handle_incoming(&state, client_id, &tx, incoming).await,
                    Err(e) => {
                        tracing::warn!(client_id = %client_id, "ignoring malformed message: {}", e);
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    // A newer connection for the same client owns the pipeline now; leave it alone.
    if state.registry.is_current(client_id, connection_id).await {
        state.registry.stop_recognition(client_id).await;
        state.synthesizer.cancel(client_id).await;
    }
    state.registry.remove_connection(client_id, connection_id).await;
    send_task.abort();

    tracing::info!(client_id = %client_id, connection_id = %connection_id, "client disconnected");
}

async fn handle_incoming(
    state: &AppState,
    client_id: ClientId,
    tx: &mpsc::Sender<OutboundFrame>,
    incoming: IncomingMessage,
) {
    match incoming {
        IncomingMessage::Respond { text } => {
            if text.len() > MAX_RESPONSE_TEXT_LEN {
                send_ws_error(
                    tx,
                    format!(
                        "text exceeds maximum length of {} bytes",
                        MAX_RESPONSE_TEXT_LEN
                    ),
                );
                return;
            }

            let trace_id = new_trace_id();
            tracing::debug!(client_id = %client_id, trace_id = %trace_id, "response text received");
            let event = Event::ResponseText(ResponseText {
                text,
                trace_id,
                client_id,
            });
            if let Err(e) = state.bus.publish(Topic::ResponseText, event).await {
                tracing::warn!(client_id = %client_id, "response text delivery failed: {}", e);
            }
        }
        IncomingMessage::Control(ControlMessage::SttInit { language }) => {
            let recognizer = &state.config.recognizer;
            let session = RecognitionSession::new(
                client_id,
                recognizer.streaming_config(language.as_deref()),
                SessionSettings::from(recognizer),
                state.recognizer.clone(),
                state.bus.clone(),
            );

            match state.registry.start_recognition(client_id, session).await {
                Ok(()) => {
                    tracing::info!(
                        client_id = %client_id,
                        language = language.as_deref().unwrap_or(&recognizer.language),
                        "recognition started"
                    );
                }
                Err(e) => {
                    tracing::error!(client_id = %client_id, "failed to start recognition: {}", e);
                    send_ws_error(tx, format!("failed to start recognition: {}", e));
                }
            }
        }
        IncomingMessage::Control(ControlMessage::SttStop) => {
            if state.registry.stop_recognition(client_id).await {
                tracing::info!(client_id = %client_id, "recognition stopped");
            }
        }
    }
}
