mod format;
mod stream;

use std::env;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

pub use format::AudioFormat;
pub use stream::{rechunk, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_VOICE: &str = "onyx";
/// Slower than natural pace, suited to guided sessions
pub const DEFAULT_SPEED: f32 = 0.75;

const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

/// Raw audio byte chunks for a single phrase. Finite and not restartable.
pub type AudioStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Fixed synthesis parameters applied to every phrase of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechParams {
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub format: AudioFormat,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_TTS_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            speed: DEFAULT_SPEED,
            format: AudioFormat::default(),
        }
    }
}

impl SpeechParams {
    /// Set the playback speed multiplier, clamped to the range the service accepts.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = if speed.is_finite() {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            DEFAULT_SPEED
        };
        self
    }
}

/// Text-to-speech service producing audio for one phrase at a time.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, params: &SpeechParams) -> anyhow::Result<AudioStream>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: AudioFormat,
}

/// Client for the OpenAI `/audio/speech` endpoint with streamed responses
#[derive(Clone)]
pub struct OpenAiSpeechClient {
    api_key: String,
    base_url: String,
    client: Client,
    chunk_size: usize,
}

impl OpenAiSpeechClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: Client::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Reads `OPENAI_API_KEY` and optional `OPENAI_BASE_URL`
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set in the environment")?;
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str, params: &SpeechParams) -> anyhow::Result<AudioStream> {
        let req_body = SpeechRequest {
            model: &params.model,
            input: text,
            voice: &params.voice,
            speed: params.speed,
            response_format: params.format,
        };

        debug!(voice = %params.voice, format = %params.format, chars = text.chars().count(), "requesting speech");
        let response = self
            .client
            .post(self.speech_url())
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("failed to reach the speech endpoint")?
            .error_for_status()
            .context("speech request was rejected")?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.context("speech stream interrupted"));
        Ok(rechunk(body, self.chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = SpeechParams::default();
        assert_eq!(params.model, "tts-1");
        assert_eq!(params.voice, "onyx");
        assert_eq!(params.speed, 0.75);
        assert_eq!(params.format, AudioFormat::Mp3);
    }

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(SpeechParams::default().with_speed(10.0).speed, 4.0);
        assert_eq!(SpeechParams::default().with_speed(0.0).speed, 0.25);
        assert_eq!(SpeechParams::default().with_speed(f32::NAN).speed, DEFAULT_SPEED);
        assert_eq!(SpeechParams::default().with_speed(1.5).speed, 1.5);
    }

    #[test]
    fn test_request_body() {
        let params = SpeechParams::default();
        let body = serde_json::to_value(SpeechRequest {
            model: &params.model,
            input: "Breathe in slowly.",
            voice: &params.voice,
            speed: params.speed,
            response_format: params.format,
        })
        .unwrap();

        assert_eq!(body["input"], "Breathe in slowly.");
        assert_eq!(body["voice"], "onyx");
        assert_eq!(body["response_format"], "mp3");
        assert_eq!(body["speed"], 0.75);
    }

    #[test]
    fn test_speech_url() {
        let client = OpenAiSpeechClient::new("key", DEFAULT_BASE_URL);
        assert_eq!(client.speech_url(), "https://api.openai.com/v1/audio/speech");
    }
}
