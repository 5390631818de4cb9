//! Streaming synthesis helpers.
//!
//! Speech providers hand back audio in whatever sizes the transport happens
//! to deliver. `rechunk` regroups those pieces into fixed-size blocks so the
//! consumer sees a steady cadence regardless of network framing. Only the
//! final block of a stream may be shorter than the requested size.

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::AudioStream;

/// Block size used for relayed audio
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

pub fn rechunk<S>(inner: S, chunk_size: usize) -> AudioStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    Box::pin(async_stream::stream! {
        let mut inner = Box::pin(inner);
        let mut pending = BytesMut::new();
        let mut failed = false;

        while let Some(item) = inner.next().await {
            match item {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() >= chunk_size {
                        yield Ok(pending.split_to(chunk_size).freeze());
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed && !pending.is_empty() {
            yield Ok(pending.freeze());
        }
    })
}
