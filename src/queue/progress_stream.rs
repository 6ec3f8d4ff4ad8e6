use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use super::types::TransferProgress;

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

pin_project! {
    /// Request body wrapper that reports cumulative bytes as chunks are polled
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        bytes_total: u64,
        progress_tx: ProgressSender,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, bytes_total: u64, progress_tx: ProgressSender) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            bytes_total,
            progress_tx,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    // The receiver is gone once the transfer settled
                    let _ = this.progress_tx.send(TransferProgress {
                        bytes_sent: *this.bytes_sent,
                        bytes_total: *this.bytes_total,
                    });
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Split shared content into body chunks without copying.
pub fn chunked(content: Bytes, chunk_size: usize) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    let chunk_size = chunk_size.max(1);
    let len = content.len();
    futures::stream::iter(
        (0..len)
            .step_by(chunk_size)
            .map(move |start| Ok(content.slice(start..(start + chunk_size).min(len)))),
    )
}
