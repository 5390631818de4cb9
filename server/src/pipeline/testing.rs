//! Scripted collaborators for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, StreamExt};
use llm_core::{ChatMessage, TextGenerator, TextStream};
use tokio::sync::mpsc;
use tts_core::{AudioStream, SpeechParams, SpeechSynthesizer};

use super::cancel::CancelFlag;
use super::{Frame, StreamEnd};

/// Replays fixed fragments, optionally failing or cancelling along the way.
pub(crate) struct ScriptedGenerator {
    fragments: Vec<String>,
    fail_on_open: bool,
    fail_after: Option<usize>,
    cancel_at: Option<(usize, CancelFlag)>,
    stall: bool,
}

impl ScriptedGenerator {
    pub(crate) fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            fail_on_open: false,
            fail_after: None,
            cancel_at: None,
            stall: false,
        }
    }

    pub(crate) fn failing_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    /// Yield `n` fragments, then an error.
    pub(crate) fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Never finish: after the scripted fragments the stream stays pending.
    pub(crate) fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Set `flag` while handing out the `n`th fragment (1-based).
    pub(crate) fn cancelling_at(mut self, n: usize, flag: CancelFlag) -> Self {
        self.cancel_at = Some((n, flag));
        self
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn stream_completion(&self, _messages: &[ChatMessage], _model: &str) -> Result<TextStream> {
        if self.fail_on_open {
            return Err(anyhow!("connection refused"));
        }

        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(anyhow!("stream reset by peer")));
        }

        let cancel_at = self.cancel_at.clone();
        let fragments = stream::iter(items).enumerate().map(move |(i, item)| {
            if let Some((n, flag)) = &cancel_at {
                if i + 1 == *n {
                    flag.cancel();
                }
            }
            item
        });
        if self.stall {
            return Ok(fragments.chain(stream::pending()).boxed());
        }
        Ok(fragments.boxed())
    }
}

/// Answers every phrase with `chunks_per_phrase` chunks labelled `"{phrase}#{i}"`.
pub(crate) struct ScriptedSynthesizer {
    chunks_per_phrase: usize,
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
    phrases: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    pub(crate) fn new(chunks_per_phrase: usize) -> Self {
        Self {
            chunks_per_phrase,
            fail_on_call: None,
            calls: AtomicUsize::new(0),
            phrases: Mutex::new(Vec::new()),
        }
    }

    /// Fail the `n`th synthesis call (1-based).
    pub(crate) fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn phrases(&self) -> Vec<String> {
        self.phrases.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _params: &SpeechParams) -> Result<AudioStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.phrases.lock().unwrap().push(text.to_string());
        if self.fail_on_call == Some(call) {
            return Err(anyhow!("voice service unavailable"));
        }

        let chunks: Vec<Result<Bytes>> = (0..self.chunks_per_phrase)
            .map(|i| Ok(Bytes::from(format!("{text}#{i}"))))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

pub(crate) fn chunk_label(chunk: &Bytes) -> String {
    String::from_utf8_lossy(chunk).into_owned()
}

/// Collect a channel until it closes, asserting exactly one end marker, last.
pub(crate) async fn drain<T>(mut rx: mpsc::Receiver<Frame<T>>) -> (Vec<T>, StreamEnd) {
    let mut items = Vec::new();
    let mut end = None;
    while let Some(frame) = rx.recv().await {
        assert!(end.is_none(), "frame received after the end marker");
        match frame {
            Frame::Item(item) => items.push(item),
            Frame::End(reason) => end = Some(reason),
        }
    }
    (items, end.expect("channel closed without an end marker"))
}
