//! Streaming speech components of the Voxline pipeline.
//!
//! Two real-time components live here, both driven by the event bus:
//!
//! - [`RecognitionSession`] bridges one client's inbound audio to a
//!   streaming [`Recognizer`] and republishes interim and final transcripts.
//! - [`OrderedPrefetchSynthesizer`] turns response text into audio, fetching
//!   several segments concurrently from a [`SpeechSynthesizer`] while
//!   emitting them strictly in order.
//!
//! The external services sit behind the [`Recognizer`] and
//! [`SpeechSynthesizer`] traits. [`WsRecognizer`] and [`ElevenLabsClient`]
//! are the network implementations; tests substitute in-memory fakes.

pub mod config;
pub mod error;
pub mod frames;
pub mod prefetch;
pub mod recognizer;
pub mod segment;
pub mod session;
pub mod synthesis;

pub use config::{RecognizerConfig, SynthesisConfig};
pub use error::VoiceError;
pub use prefetch::{OrderedPrefetchSynthesizer, PrefetchSettings, SynthesisRequest};
pub use recognizer::{
    AudioSink, RecognitionResponse, RecognitionResult, Recognizer, RecognizerStream,
    StreamingConfig, WsRecognizer,
};
pub use segment::{is_short_text, prepare_text, split_segments, Segment};
pub use session::{RecognitionSession, SessionSettings, SessionState};
pub use synthesis::{AudioStream, ElevenLabsClient, SpeechSynthesizer};

/// Runs `fut` to completion unless `token` is cancelled first.
pub(crate) async fn until_cancelled<F: std::future::Future>(
    token: &tokio_util::sync::CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}
