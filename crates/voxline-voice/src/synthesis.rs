use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::segment::prepare_text;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

/// Maximum text input size for one synthesis request (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Audio bytes as they arrive from the synthesis service.
pub type AudioStream = BoxStream<'static, Result<Bytes, VoiceError>>;

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Starts synthesizing `text` and streams the encoded audio back.
    async fn stream(&self, text: &str) -> Result<AudioStream, VoiceError>;

    /// Synthesizes `text` and returns the complete audio.
    async fn fetch(&self, text: &str) -> Result<Bytes, VoiceError> {
        let mut stream = self.stream(text).await?;
        let mut audio = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio.freeze())
    }
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    language_code: &'a str,
    voice_settings: VoiceSettings,
}

/// HTTP client for the ElevenLabs streaming text-to-speech endpoint.
#[derive(Clone)]
pub struct ElevenLabsClient {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl ElevenLabsClient {
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(concat!("voxline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VoiceError::Synthesis(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.output_format
        )
    }
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn stream(&self, text: &str) -> Result<AudioStream, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let prepared = prepare_text(text);
        let body = SynthesisBody {
            text: &prepared,
            model_id: &self.config.model_id,
            language_code: &self.config.language_code,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "application/octet-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        tracing::debug!(status = %status, chars = prepared.chars().count(), "synthesis response");

        if status == StatusCode::FORBIDDEN {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("403 (gated): {}", detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "service returned status {}: {}",
                status, detail
            )));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio: {}", e)))
            .boxed())
    }
}
