use std::sync::Arc;

use futures_util::StreamExt;
use llm_core::{ChatMessage, TextGenerator};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::cancel::CancelFlag;
use super::segmenter::PhraseSegmenter;
use super::{Frame, PipelineError, StreamEnd};

/// Drives the generation call and feeds segmented phrases to the phrase channel.
///
/// Sends exactly one `Frame::End` on every path. A cancelled or failed
/// generation does not flush the partially buffered phrase. Cancellation is
/// also observed while waiting on the generator, so a stalled upstream
/// cannot keep the producer alive.
pub struct TextProducer {
    generator: Arc<dyn TextGenerator>,
    messages: Vec<ChatMessage>,
    model: String,
    segmenter: PhraseSegmenter,
    phrases: mpsc::Sender<Frame<String>>,
    cancel: CancelFlag,
}

impl TextProducer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        messages: Vec<ChatMessage>,
        model: String,
        segmenter: PhraseSegmenter,
        phrases: mpsc::Sender<Frame<String>>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            generator,
            messages,
            model,
            segmenter,
            phrases,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let end = self.produce().await;
        debug!(outcome = end.label(), "text producer finished");
        // the consumer may already be gone
        let _ = self.phrases.send(Frame::End(end)).await;
    }

    async fn produce(&mut self) -> StreamEnd {
        if self.cancel.is_cancelled() {
            return StreamEnd::Cancelled;
        }

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
            opened = self.generator.stream_completion(&self.messages, &self.model) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("text generation failed to start: {e:#}");
                return StreamEnd::Failed(PipelineError::Generation(format!("{e:#}")));
            }
        };

        let mut emitted = 0usize;
        loop {
            // a stalled upstream must not outlive a cancelled pipeline
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = fragments.next() => Some(next),
            };
            let fragment = match next {
                Some(Some(fragment)) => fragment,
                Some(None) => break,
                None => {
                    debug!(emitted, "text producer cancelled while waiting for text");
                    return StreamEnd::Cancelled;
                }
            };
            if self.cancel.is_cancelled() {
                debug!(emitted, "text producer observed cancellation");
                return StreamEnd::Cancelled;
            }

            let fragment = match fragment {
                Ok(fragment) => fragment,
                Err(e) => {
                    warn!(emitted, "text generation failed mid-stream: {e:#}");
                    return StreamEnd::Failed(PipelineError::Generation(format!("{e:#}")));
                }
            };
            if fragment.is_empty() {
                continue;
            }

            for phrase in self.segmenter.push(&fragment) {
                if !self.emit(phrase).await {
                    return StreamEnd::Cancelled;
                }
                emitted += 1;
            }
        }

        if let Some(rest) = self.segmenter.finish() {
            if !self.emit(rest).await {
                return StreamEnd::Cancelled;
            }
            emitted += 1;
        }
        debug!(emitted, "text generation complete");
        StreamEnd::Complete
    }

    async fn emit(&self, phrase: String) -> bool {
        debug!(chars = phrase.chars().count(), "phrase ready");
        if self.phrases.send(Frame::Item(phrase)).await.is_err() {
            debug!("phrase channel closed");
            return false;
        }
        true
    }
}
