//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{body::Bytes, Router};
use futures_util::{stream, StreamExt};
use llm_core::{ChatMessage, TextGenerator, TextStream};
use meditation_server::{api_router, AppState, ServerConfig};
use tts_core::{AudioStream, SpeechParams, SpeechSynthesizer};

/// Text generator replaying fixed fragments
pub struct FakeGenerator {
    fragments: Vec<String>,
    fail_on_open: bool,
    delay: Option<Duration>,
    stall: bool,
}

impl FakeGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            fail_on_open: false,
            delay: None,
            stall: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_on_open: true,
            ..Self::new(&[])
        }
    }

    /// Keep the stream open without further text after the last fragment
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Wait `delay` before every fragment
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn stream_completion(&self, _messages: &[ChatMessage], _model: &str) -> anyhow::Result<TextStream> {
        if self.fail_on_open {
            return Err(anyhow!("LLM API error 503: overloaded"));
        }
        let delay = self.delay;
        let fragments = stream::iter(self.fragments.clone())
            .then(move |fragment| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, anyhow::Error>(fragment)
            })
            .boxed();
        if self.stall {
            return Ok(fragments.chain(stream::pending()).boxed());
        }
        Ok(fragments)
    }
}

/// Synthesizer emitting `[phrase#i]` chunks so bodies show phrase order
pub struct FakeSynthesizer {
    chunks_per_phrase: usize,
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn new(chunks_per_phrase: usize) -> Self {
        Self {
            chunks_per_phrase,
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`th synthesis call (1-based)
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _params: &SpeechParams) -> anyhow::Result<AudioStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(anyhow!("TTS API error 500: voice unavailable"));
        }
        let chunks: Vec<anyhow::Result<Bytes>> = (0..self.chunks_per_phrase)
            .map(|i| Ok(Bytes::from(format!("[{text}#{i}]"))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Config with short phrases so small scripts split into several phrases
pub fn test_config() -> ServerConfig {
    ServerConfig {
        min_phrase_length: 5,
        llm_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn test_state(generator: FakeGenerator, synthesizer: Arc<FakeSynthesizer>, config: ServerConfig) -> AppState {
    AppState::new(Arc::new(generator), synthesizer, config)
}

/// Create a test app instance
pub fn create_test_app(state: AppState) -> Router {
    api_router(state)
}

pub fn default_app() -> Router {
    create_test_app(test_state(
        FakeGenerator::new(&["Breathe in slowly. ", "Hold it. ", "Let go."]),
        Arc::new(FakeSynthesizer::new(2)),
        test_config(),
    ))
}
