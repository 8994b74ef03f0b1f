//! Bus topics and their event payloads.
//!
//! Every topic has exactly one payload shape. [`Event`] is the closed set of
//! those shapes, and [`Event::topic`] tells which topic a value belongs to so
//! the bus can reject a mismatched publish before delivering anything.

use crate::ClientId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Raw inbound PCM audio from a client.
    #[serde(rename = "client.audio")]
    ClientAudio,
    /// Provisional recognition result.
    #[serde(rename = "transcript.partial")]
    TranscriptPartial,
    /// Recognizer-declared stable result; one per utterance.
    #[serde(rename = "transcript.final")]
    TranscriptFinal,
    /// Response text to be spoken back to the client.
    #[serde(rename = "response.text")]
    ResponseText,
    /// One frame of synthesized audio for a client.
    #[serde(rename = "audio.chunk")]
    AudioChunk,
    /// All audio for one response turn has been emitted.
    #[serde(rename = "audio.end")]
    AudioEnd,
}

impl Topic {
    /// Every topic, in pipeline order.
    pub const ALL: [Topic; 6] = [
        Self::ClientAudio,
        Self::TranscriptPartial,
        Self::TranscriptFinal,
        Self::ResponseText,
        Self::AudioChunk,
        Self::AudioEnd,
    ];

    /// Returns the canonical dotted name for this topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientAudio => "client.audio",
            Self::TranscriptPartial => "transcript.partial",
            Self::TranscriptFinal => "transcript.final",
            Self::ResponseText => "response.text",
            Self::AudioChunk => "audio.chunk",
            Self::AudioEnd => "audio.end",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = ParseTopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| ParseTopicError(s.to_string()))
    }
}

/// Error returned when parsing an unknown topic string.
#[derive(Debug, Clone, Error)]
#[error("unknown topic: {0}")]
pub struct ParseTopicError(pub String);

/// Payload of `client.audio`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientAudio {
    /// 16 kHz mono s16le PCM.
    pub chunk: Bytes,
    pub client_id: ClientId,
}

/// Payload of `transcript.partial` and `transcript.final`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub start_ms: u64,
    pub end_ms: u64,
    pub client_id: ClientId,
}

/// Payload of `response.text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseText {
    pub text: String,
    pub trace_id: String,
    pub client_id: ClientId,
}

/// Payload of `audio.chunk`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Compressed audio frame as returned by the synthesis service.
    pub chunk: Bytes,
    pub client_id: ClientId,
}

/// Payload of `audio.end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioEnd {
    pub trace_id: String,
    pub client_id: ClientId,
}

/// An immutable event travelling over the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ClientAudio(ClientAudio),
    TranscriptPartial(Transcript),
    TranscriptFinal(Transcript),
    ResponseText(ResponseText),
    AudioChunk(AudioChunk),
    AudioEnd(AudioEnd),
}

impl Event {
    /// Builds a `transcript.partial` or `transcript.final` event from a
    /// recognition result, depending on `is_final`.
    pub fn transcript(
        client_id: ClientId,
        text: impl Into<String>,
        is_final: bool,
        start_ms: u64,
        end_ms: u64,
    ) -> Self {
        let transcript = Transcript {
            text: text.into(),
            is_final,
            start_ms,
            end_ms,
            client_id,
        };
        if is_final {
            Self::TranscriptFinal(transcript)
        } else {
            Self::TranscriptPartial(transcript)
        }
    }

    /// Returns the topic this event's shape belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Self::ClientAudio(_) => Topic::ClientAudio,
            Self::TranscriptPartial(_) => Topic::TranscriptPartial,
            Self::TranscriptFinal(_) => Topic::TranscriptFinal,
            Self::ResponseText(_) => Topic::ResponseText,
            Self::AudioChunk(_) => Topic::AudioChunk,
            Self::AudioEnd(_) => Topic::AudioEnd,
        }
    }

    /// Returns the client this event affects.
    pub fn client_id(&self) -> ClientId {
        match self {
            Self::ClientAudio(e) => e.client_id,
            Self::TranscriptPartial(e) | Self::TranscriptFinal(e) => e.client_id,
            Self::ResponseText(e) => e.client_id,
            Self::AudioChunk(e) => e.client_id,
            Self::AudioEnd(e) => e.client_id,
        }
    }
}
