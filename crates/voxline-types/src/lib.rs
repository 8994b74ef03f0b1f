//! Shared types for the Voxline voice pipeline.
//!
//! This crate provides the identifiers, audio format constants, and event
//! shapes that every other Voxline crate exchanges. Components never hold
//! references to each other; they agree on the types defined here and talk
//! through the event bus.
//!
//! No crate in the workspace depends on anything *except* `voxline-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use events::{
    AudioChunk, AudioEnd, ClientAudio, Event, ParseTopicError, ResponseText, Topic, Transcript,
};

/// Sample rate of inbound client audio, in Hz.
pub const INPUT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Channel count of inbound client audio.
pub const INPUT_CHANNELS: u32 = 1;

/// Bytes per second of inbound audio (16-bit linear PCM, mono).
pub const INPUT_BYTES_PER_SECOND: u64 = INPUT_SAMPLE_RATE_HZ as u64 * 2 * INPUT_CHANNELS as u64;

/// Converts a byte count of inbound PCM audio into milliseconds.
pub fn pcm_bytes_to_ms(bytes: u64) -> u64 {
    bytes * 1000 / INPUT_BYTES_PER_SECOND
}

/// Identity of one connected client.
///
/// Every event that affects a single client carries its `ClientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh random client identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Generates a new trace identifier for one response turn (`trace_<uuid>`).
pub fn new_trace_id() -> String {
    format!("trace_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_round_trips_through_string() {
        let id = ClientId::new();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn client_id_serializes_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&ClientId::from(uuid)).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }

    #[test]
    fn pcm_duration_matches_16khz_mono() {
        assert_eq!(pcm_bytes_to_ms(32_000), 1000);
        assert_eq!(pcm_bytes_to_ms(3200), 100);
        assert_eq!(pcm_bytes_to_ms(0), 0);
    }

    #[test]
    fn trace_ids_are_prefixed_and_unique() {
        let a = new_trace_id();
        let b = new_trace_id();
        assert!(a.starts_with("trace_"));
        assert_ne!(a, b);
    }
}
