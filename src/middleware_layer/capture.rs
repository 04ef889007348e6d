//! Response body observation.
//!
//! Wraps a response body stream so it flows to the client untouched while a
//! bounded tail buffer and a byte counter accumulate on the side. When the
//! stream ends (EOF, read error or client disconnect) a finalizer fires
//! exactly once with whatever was captured. The call-log stage uses the
//! captured bytes; the metrics stage only needs the count.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::Response;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};

/// Completion callback: `(captured_tail, total_bytes)`.
type Finalizer = Box<dyn FnOnce(Bytes, u64) + Send + 'static>;

/// Replace the response body with an observed copy of itself.
///
/// `capture_limit` bounds the retained bytes; when the body outgrows it the
/// buffer keeps the tail, which is where a stream's terminal frame lives.
/// A limit of zero counts without retaining anything.
pub(crate) fn observe_response_body<F>(
    response: Response,
    capture_limit: usize,
    on_complete: F,
) -> Response
where
    F: FnOnce(Bytes, u64) + Send + 'static,
{
    let (parts, body) = response.into_parts();

    let observed = ObservedBody {
        inner: body.into_data_stream().boxed(),
        buffer: BytesMut::new(),
        capture_limit,
        total: 0,
        finalizer: Some(Box::new(on_complete)),
    };

    Response::from_parts(parts, Body::from_stream(observed))
}

struct ObservedBody {
    inner: BoxStream<'static, Result<Bytes, axum::Error>>,
    buffer: BytesMut,
    capture_limit: usize,
    total: u64,
    finalizer: Option<Finalizer>,
}

impl ObservedBody {
    fn record(&mut self, chunk: &Bytes) {
        self.total += chunk.len() as u64;
        if self.capture_limit == 0 {
            return;
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.capture_limit {
            let excess = self.buffer.len() - self.capture_limit;
            self.buffer.advance(excess);
        }
    }

    fn finish(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            let captured = std::mem::take(&mut self.buffer).freeze();
            finalizer(captured, self.total);
        }
    }
}

impl Stream for ObservedBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.record(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ObservedBody {
    // A disconnected client drops the body mid-stream; the observation still
    // completes with what was seen.
    fn drop(&mut self) {
        self.finish();
    }
}
