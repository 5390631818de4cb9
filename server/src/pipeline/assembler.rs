//! Relays pipeline audio to the HTTP response body.

use std::{io, str::FromStr, sync::Arc};

use axum::body::Bytes;
use futures_util::Stream;
use tracing::{info, warn};

use super::{Frame, RunningPipeline, StreamEnd};
use crate::metrics::StreamMetrics;

/// What a failure after the first audio byte does to the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// End the body normally; the audio sent so far is the result
    #[default]
    Truncate,
    /// Abort the chunked transfer so the client sees an incomplete response
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(FailurePolicy::Truncate),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(format!("unknown stream failure policy: {other}")),
        }
    }
}

/// Body stream writing each audio chunk as soon as it is received.
///
/// `first` is a chunk already taken off the pipeline. `guard` lives exactly as
/// long as the body, so dropping the body (client gone) drops it as well.
/// Workers are joined before the body ends.
pub fn audio_body<G>(
    first: Option<Bytes>,
    pipeline: RunningPipeline,
    policy: FailurePolicy,
    metrics: Arc<StreamMetrics>,
    guard: G,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    G: Send + 'static,
{
    async_stream::stream! {
        let _guard = guard;
        let mut pipeline = pipeline;
        let mut sent = 0usize;

        if let Some(chunk) = first {
            sent += chunk.len();
            metrics.record_audio_bytes(chunk.len());
            yield Ok(chunk);
        }

        while let Some(frame) = pipeline.next_frame().await {
            match frame {
                Frame::Item(chunk) => {
                    sent += chunk.len();
                    metrics.record_audio_bytes(chunk.len());
                    yield Ok(chunk);
                }
                Frame::End(end) => {
                    pipeline.join().await;
                    metrics.record_stream_end(&end);
                    match end {
                        StreamEnd::Complete => info!(bytes = sent, "audio stream complete"),
                        StreamEnd::Cancelled => info!(bytes = sent, "audio stream cancelled"),
                        StreamEnd::Failed(e) => {
                            warn!(bytes = sent, "audio stream ended early: {e}");
                            if policy == FailurePolicy::Abort {
                                yield Err(io::Error::new(io::ErrorKind::Other, e));
                            }
                        }
                    }
                }
            }
        }
    }
}
