use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Incremental text fragments of one completion. Finite and not restartable.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Text generation service capable of streaming a completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a streaming completion for `messages`.
    async fn stream_completion(&self, messages: &[ChatMessage], model: &str) -> Result<TextStream>;

    /// Run a completion to the end and return the whole reply
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        let mut fragments = self.stream_completion(messages, model).await?;
        let mut reply = String::new();
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }
}

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// One `chat.completion.chunk` event of a streamed response
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits a server-sent event byte stream into `data:` payloads.
/// Lines may arrive split across network chunks.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\r' || c == '\n');

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else if !data.is_empty() {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }
}

fn parse_delta(payload: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(payload)
        .with_context(|| format!("unexpected chat completion chunk: {payload}"))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content))
}

#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    /// Create a new client. Reads the API key from `OPENAI_API_KEY` and an
    /// optional endpoint override from `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set in the environment")?;
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn stream_completion(&self, messages: &[ChatMessage], model: &str) -> Result<TextStream> {
        let req_body = ChatRequest { model, messages, stream: true };

        debug!(model, messages = messages.len(), "opening chat completion stream");
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("failed to reach the chat completions endpoint")?
            .error_for_status() // convert non-200 into error
            .context("chat completions request was rejected")?;

        let mut body = response.bytes_stream();
        let fragments = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("chat completion stream interrupted"));
                        break;
                    }
                };
                for event in decoder.feed(&chunk) {
                    match event {
                        SseEvent::Done => break 'read,
                        SseEvent::Data(payload) => match parse_delta(&payload) {
                            Ok(Some(content)) if !content.is_empty() => {
                                yield Ok(content);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                yield Err(e);
                                break 'read;
                            }
                        },
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}
