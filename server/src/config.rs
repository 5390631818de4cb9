// Configuration for the server, read from the environment

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use tts_core::{AudioFormat, SpeechParams};

use crate::pipeline::{
    segmenter::DEFAULT_MIN_PHRASE_LENGTH, FailurePolicy, PipelineConfig, SegmenterConfig,
    DEFAULT_AUDIO_CAPACITY, DEFAULT_PHRASE_CAPACITY, DEFAULT_PREBUFFER_CHUNKS,
};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub llm_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub llm_model: String,
    pub system_prompt: String,
    pub speech: SpeechParams,
    pub min_phrase_length: usize,
    pub phrase_channel_capacity: usize,
    pub audio_channel_capacity: usize,
    pub prebuffer_chunks: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            llm_timeout_secs: 120,
            request_timeout_secs: 300,
            cors_allowed_origins: None,
            llm_model: llm_core::DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            speech: SpeechParams::default(),
            min_phrase_length: DEFAULT_MIN_PHRASE_LENGTH,
            phrase_channel_capacity: DEFAULT_PHRASE_CAPACITY,
            audio_channel_capacity: DEFAULT_AUDIO_CAPACITY,
            prebuffer_chunks: DEFAULT_PREBUFFER_CHUNKS,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Parse `key` from the environment, keeping `default` when unset or invalid.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value for {key}: {raw:?}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| parse_origins(&origins));

        let speech = SpeechParams {
            model: env_string("TTS_MODEL", &defaults.speech.model),
            voice: env_string("TTS_VOICE", &defaults.speech.voice),
            speed: defaults.speech.speed,
            format: env_or::<AudioFormat>("TTS_FORMAT", defaults.speech.format),
        }
        .with_speed(env_or("TTS_SPEED", defaults.speech.speed));

        Self {
            port: env_or("PORT", defaults.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            llm_model: env_string("LLM_MODEL", &defaults.llm_model),
            system_prompt: env_string("SYSTEM_PROMPT", &defaults.system_prompt),
            speech,
            min_phrase_length: env_or("MIN_PHRASE_LENGTH", defaults.min_phrase_length),
            phrase_channel_capacity: env_or("PHRASE_CHANNEL_CAPACITY", defaults.phrase_channel_capacity).max(1),
            audio_channel_capacity: env_or("AUDIO_CHANNEL_CAPACITY", defaults.audio_channel_capacity).max(1),
            prebuffer_chunks: env_or("PREBUFFER_CHUNKS", defaults.prebuffer_chunks),
            failure_policy: env_or("STREAM_FAILURE_POLICY", defaults.failure_policy),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Milliseconds between rate limiter token refills, so that the
    /// sustained rate matches `rate_limit_per_minute`
    pub fn rate_limit_interval_ms(&self) -> u64 {
        (60_000 / u64::from(self.rate_limit_per_minute.max(1))).max(1)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Settings for one request's pipeline
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.llm_model.clone(),
            speech: self.speech.clone(),
            segmenter: SegmenterConfig {
                min_phrase_length: self.min_phrase_length,
                ..Default::default()
            },
            phrase_capacity: self.phrase_channel_capacity,
            audio_capacity: self.audio_channel_capacity,
            prebuffer_chunks: self.prebuffer_chunks,
        }
    }
}
