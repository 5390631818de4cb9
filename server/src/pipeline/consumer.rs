use std::sync::Arc;

use axum::body::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tts_core::{SpeechParams, SpeechSynthesizer};

use super::cancel::CancelFlag;
use super::{Frame, PipelineError, StreamEnd};

/// Synthesizes phrases one at a time and relays their audio in order.
///
/// Audio of one phrase is fully relayed before the next phrase is synthesized,
/// so chunks never interleave. The bounded audio channel is the throttle: a
/// full channel parks the consumer before it issues the next synthesis call.
pub struct SpeechConsumer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    params: SpeechParams,
    phrases: mpsc::Receiver<Frame<String>>,
    audio: mpsc::Sender<Frame<Bytes>>,
    cancel: CancelFlag,
    prebuffer_chunks: usize,
}

impl SpeechConsumer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        params: SpeechParams,
        phrases: mpsc::Receiver<Frame<String>>,
        audio: mpsc::Sender<Frame<Bytes>>,
        cancel: CancelFlag,
        prebuffer_chunks: usize,
    ) -> Self {
        Self {
            synthesizer,
            params,
            phrases,
            audio,
            cancel,
            prebuffer_chunks,
        }
    }

    pub async fn run(mut self) {
        let end = self.consume().await;
        debug!(outcome = end.label(), "speech consumer finished");
        if matches!(end, StreamEnd::Failed(_)) {
            // nobody will speak further phrases, stop generating them
            self.cancel.cancel();
        }
        let _ = self.audio.send(Frame::End(end)).await;
    }

    async fn consume(&mut self) -> StreamEnd {
        let mut startup = StartupBuffer::new(self.prebuffer_chunks);
        let mut index = 0usize;

        loop {
            let phrase = match self.phrases.recv().await {
                Some(Frame::Item(phrase)) => phrase,
                Some(Frame::End(end)) => return end,
                None => return StreamEnd::Failed(PipelineError::WorkerLost("text producer")),
            };
            if self.cancel.is_cancelled() {
                debug!(phrase = index, "speech consumer observed cancellation");
                return StreamEnd::Cancelled;
            }
            index += 1;

            debug!(phrase = index, chars = phrase.chars().count(), "synthesizing phrase");
            let mut audio = match self.synthesizer.synthesize(&phrase, &self.params).await {
                Ok(audio) => audio,
                Err(e) => {
                    warn!(phrase = index, "speech synthesis failed: {e:#}");
                    return StreamEnd::Failed(PipelineError::Synthesis(format!("{e:#}")));
                }
            };

            let mut chunks = 0usize;
            while let Some(chunk) = audio.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(phrase = index, chunks, "speech stream failed: {e:#}");
                        return StreamEnd::Failed(PipelineError::Synthesis(format!("{e:#}")));
                    }
                };
                if chunk.is_empty() {
                    continue;
                }
                chunks += 1;
                for ready in startup.push(chunk) {
                    if !self.forward(ready).await {
                        return StreamEnd::Cancelled;
                    }
                }
            }

            // a first phrase shorter than the startup window still plays
            for ready in startup.release() {
                if !self.forward(ready).await {
                    return StreamEnd::Cancelled;
                }
            }
            debug!(phrase = index, chunks, "phrase relayed");
        }
    }

    async fn forward(&self, chunk: Bytes) -> bool {
        if self.audio.send(Frame::Item(chunk)).await.is_err() {
            debug!("audio channel closed");
            return false;
        }
        true
    }
}

/// Holds back the opening chunks of the first phrase and releases them
/// together, absorbing arrival jitter right after the connection opens.
#[derive(Debug)]
struct StartupBuffer {
    target: usize,
    held: Vec<Bytes>,
    released: bool,
}

impl StartupBuffer {
    fn new(target: usize) -> Self {
        Self {
            target,
            held: Vec::with_capacity(target),
            released: target == 0,
        }
    }

    fn push(&mut self, chunk: Bytes) -> Vec<Bytes> {
        if self.released {
            return vec![chunk];
        }
        self.held.push(chunk);
        if self.held.len() >= self.target {
            self.released = true;
            std::mem::take(&mut self.held)
        } else {
            Vec::new()
        }
    }

    fn release(&mut self) -> Vec<Bytes> {
        self.released = true;
        std::mem::take(&mut self.held)
    }
}
