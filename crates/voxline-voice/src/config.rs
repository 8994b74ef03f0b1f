use crate::error::VoiceError;
use crate::recognizer::StreamingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use voxline_types::{INPUT_CHANNELS, INPUT_SAMPLE_RATE_HZ};

fn default_recognizer_model() -> String {
    "chirp_3".to_string()
}

fn default_recognizer_language() -> String {
    "et-EE".to_string()
}

fn default_sample_rate_hz() -> u32 {
    INPUT_SAMPLE_RATE_HZ
}

fn default_queue_capacity() -> usize {
    64
}

fn default_drain_timeout_ms() -> u64 {
    2_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Streaming recognizer connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// WebSocket endpoint of the recognizer. Empty disables recognition.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_recognizer_model")]
    pub model: String,
    /// Default recognition language; clients may override it in `stt_init`.
    #[serde(default = "default_recognizer_language")]
    pub language: String,
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    /// Ingestion queue capacity, in audio chunks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long `stop` lets queued audio and trailing results drain.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            model: default_recognizer_model(),
            language: default_recognizer_language(),
            sample_rate_hz: default_sample_rate_hz(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl fmt::Debug for RecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("queue_capacity", &self.queue_capacity)
            .field("drain_timeout_ms", &self.drain_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl RecognizerConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Builds the first message sent to the recognizer, optionally with a
    /// per-session language.
    pub fn streaming_config(&self, language: Option<&str>) -> StreamingConfig {
        StreamingConfig {
            encoding: "LINEAR16".to_string(),
            sample_rate_hz: self.sample_rate_hz,
            channels: INPUT_CHANNELS,
            language_codes: vec![language.unwrap_or(&self.language).to_string()],
            model: self.model.clone(),
            interim_results: true,
        }
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.queue_capacity == 0 {
            return Err(VoiceError::Config(
                "recognizer.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(VoiceError::Config(
                "recognizer.sample_rate_hz must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_synthesis_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "tIFPE2y0DAU6xfZn3Fka".to_string()
}

fn default_model_id() -> String {
    "eleven_v3".to_string()
}

fn default_language_code() -> String {
    "et".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_output_format() -> String {
    "mp3_44100_64".to_string()
}

fn default_max_concurrency() -> usize {
    3
}

fn default_frame_bytes() -> usize {
    8192
}

fn default_short_text_chars() -> usize {
    240
}

fn default_max_segment_chars() -> usize {
    220
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_synthesis_connect_timeout_ms() -> u64 {
    8_000
}

/// Speech synthesis service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    /// v3 models accept only 0.0, 0.5 and 1.0.
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Upper bound on concurrent segment fetches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Size of each `audio.chunk` frame sent to the client.
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,
    /// Texts up to this many characters take the single-fetch path.
    #[serde(default = "default_short_text_chars")]
    pub short_text_chars: usize,
    #[serde(default = "default_max_segment_chars")]
    pub max_segment_chars: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_synthesis_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_synthesis_base_url(),
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            language_code: default_language_code(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            output_format: default_output_format(),
            max_concurrency: default_max_concurrency(),
            frame_bytes: default_frame_bytes(),
            short_text_chars: default_short_text_chars(),
            max_segment_chars: default_max_segment_chars(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_synthesis_connect_timeout_ms(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("language_code", &self.language_code)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .field("output_format", &self.output_format)
            .field("max_concurrency", &self.max_concurrency)
            .field("frame_bytes", &self.frame_bytes)
            .field("short_text_chars", &self.short_text_chars)
            .field("max_segment_chars", &self.max_segment_chars)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl SynthesisConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.max_concurrency == 0 {
            return Err(VoiceError::Config(
                "synthesis.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.frame_bytes == 0 {
            return Err(VoiceError::Config(
                "synthesis.frame_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_segment_chars == 0 {
            return Err(VoiceError::Config(
                "synthesis.max_segment_chars must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.stability) {
            return Err(VoiceError::Config(
                "synthesis.stability must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_boost) {
            return Err(VoiceError::Config(
                "synthesis.similarity_boost must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
