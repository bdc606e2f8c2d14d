//! Request bodies that report how many bytes have been handed to the connection

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Receives the cumulative number of body bytes transferred so far.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// A callback that ignores progress.
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

pin_project! {
    /// Wraps a byte stream and invokes a callback after every frame.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        transferred: u64,
        on_progress: ProgressCallback,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, on_progress: ProgressCallback) -> Self {
        Self {
            inner,
            transferred: 0,
            on_progress,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                *this.transferred += frame.len() as u64;
                (this.on_progress)(*this.transferred);
                Poll::Ready(Some(Ok(frame)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Split `data` into frames of at most `frame_size` bytes without copying.
pub fn frames(
    data: Bytes,
    frame_size: usize,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let frame_size = frame_size.max(1);
    let len = data.len();
    let offsets = (0..len).step_by(frame_size);
    futures::stream::iter(
        offsets.map(move |start| Ok(data.slice(start..(start + frame_size).min(len)))),
    )
}

/// Build a streaming request body over `data` that reports progress per frame.
pub fn progress_body(
    data: Bytes,
    frame_size: usize,
    on_progress: ProgressCallback,
) -> reqwest::Body {
    reqwest::Body::wrap_stream(ProgressStream::new(frames(data, frame_size), on_progress))
}
