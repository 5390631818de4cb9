//! Real-time text-to-speech streaming pipeline.
//!
//! ```text
//! generator -> segmenter -> phrase channel -> synthesizer -> audio channel -> assembler
//! ```
//!
//! The producer and the consumer run as two tokio tasks; the request handler
//! drains the audio channel. Both channels carry [`Frame`]s and each receives
//! exactly one [`Frame::End`], always last. Channel order is the only ordering
//! mechanism. The bounded audio channel throttles synthesis; the phrase channel
//! is bounded too, so a stalled consumer eventually stops reading from the
//! generation stream.

pub mod assembler;
pub mod cancel;
pub mod consumer;
pub mod producer;
pub mod segmenter;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use llm_core::{ChatMessage, TextGenerator};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tts_core::{SpeechParams, SpeechSynthesizer};

pub use assembler::{audio_body, FailurePolicy};
pub use cancel::CancelFlag;
pub use consumer::SpeechConsumer;
pub use producer::TextProducer;
pub use segmenter::{PhraseSegmenter, SegmenterConfig};

pub const DEFAULT_PHRASE_CAPACITY: usize = 64;
pub const DEFAULT_AUDIO_CAPACITY: usize = 32;
pub const DEFAULT_PREBUFFER_CHUNKS: usize = 4;

/// Channel element: a payload or the end-of-stream marker
#[derive(Debug)]
pub enum Frame<T> {
    Item(T),
    End(StreamEnd),
}

/// Why a stream ended
#[derive(Debug)]
pub enum StreamEnd {
    Complete,
    Cancelled,
    Failed(PipelineError),
}

impl StreamEnd {
    pub fn label(&self) -> &'static str {
        match self {
            StreamEnd::Complete => "complete",
            StreamEnd::Cancelled => "cancelled",
            StreamEnd::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("{0} stopped without closing its stream")]
    WorkerLost(&'static str),

    #[error("no audio produced within {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Text generation model id
    pub model: String,
    pub speech: SpeechParams,
    pub segmenter: SegmenterConfig,
    pub phrase_capacity: usize,
    pub audio_capacity: usize,
    /// Chunks of the first phrase held back before playback starts
    pub prebuffer_chunks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: llm_core::DEFAULT_MODEL.to_string(),
            speech: SpeechParams::default(),
            segmenter: SegmenterConfig::default(),
            phrase_capacity: DEFAULT_PHRASE_CAPACITY,
            audio_capacity: DEFAULT_AUDIO_CAPACITY,
            prebuffer_chunks: DEFAULT_PREBUFFER_CHUNKS,
        }
    }
}

/// One request's pipeline. Collaborators are injected, nothing is global.
pub struct StreamPipeline {
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: PipelineConfig,
    cancel: CancelFlag,
}

impl StreamPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Spawn the producer and consumer tasks.
    pub fn start(self, messages: Vec<ChatMessage>) -> RunningPipeline {
        let (phrase_tx, phrase_rx) = mpsc::channel(self.config.phrase_capacity.max(1));
        let (audio_tx, audio_rx) = mpsc::channel(self.config.audio_capacity.max(1));

        info!(
            model = %self.config.model,
            voice = %self.config.speech.voice,
            min_phrase_length = self.config.segmenter.min_phrase_length,
            "starting speech pipeline"
        );

        let producer = TextProducer::new(
            self.generator,
            messages,
            self.config.model,
            PhraseSegmenter::new(self.config.segmenter),
            phrase_tx,
            self.cancel.clone(),
        );
        let consumer = SpeechConsumer::new(
            self.synthesizer,
            self.config.speech,
            phrase_rx,
            audio_tx,
            self.cancel.clone(),
            self.config.prebuffer_chunks,
        );

        RunningPipeline {
            audio: audio_rx,
            workers: vec![tokio::spawn(producer.run()), tokio::spawn(consumer.run())],
            cancel: self.cancel,
            ended: false,
        }
    }
}

/// Handle on a started pipeline, owned by the assembler.
///
/// Dropping it before the end marker arrived cancels the workers.
pub struct RunningPipeline {
    audio: mpsc::Receiver<Frame<Bytes>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelFlag,
    ended: bool,
}

impl RunningPipeline {
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Next audio frame; `None` once the end marker has been handed out.
    pub async fn next_frame(&mut self) -> Option<Frame<Bytes>> {
        if self.ended {
            return None;
        }
        match self.audio.recv().await {
            Some(Frame::Item(chunk)) => Some(Frame::Item(chunk)),
            Some(Frame::End(end)) => {
                self.ended = true;
                if matches!(end, StreamEnd::Failed(_)) {
                    self.cancel.cancel();
                }
                Some(Frame::End(end))
            }
            None => {
                self.ended = true;
                self.cancel.cancel();
                Some(Frame::End(StreamEnd::Failed(PipelineError::WorkerLost("speech consumer"))))
            }
        }
    }

    /// Cancel the workers and wait up to `grace` for them to finish.
    /// Returns false if a worker was still running; it is left detached
    /// and stops at its next cancellation check.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.join()).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "pipeline workers still running after shutdown");
            return false;
        }
        true
    }

    /// Wait for both workers to finish.
    pub async fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("pipeline worker panicked: {e}");
            }
        }
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.ended {
            self.cancel.cancel();
        }
    }
}
