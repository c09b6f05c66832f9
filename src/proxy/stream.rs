use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use super::guard::InFlightGuard;
use super::transport::{BodyStream, TransportError};

pin_project! {
    /// Upstream body that keeps its path's in-flight slot until it is
    /// exhausted or dropped
    pub struct GuardedStream {
        #[pin]
        inner: BodyStream,
        guard: Option<InFlightGuard>,
    }
}

impl GuardedStream {
    pub fn new(inner: BodyStream, guard: InFlightGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(None) = polled {
            // Free the slot as soon as the body ends, not when the response is dropped.
            this.guard.take();
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
