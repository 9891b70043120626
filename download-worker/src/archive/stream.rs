//! Response body for an archive being assembled in the background.

use super::{ArchiveError, ArchiveSummary};
use bytes::Bytes;
use futures_util::Stream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

/// Bytes of the archive, read from the pipe the assembling task writes into.
///
/// Dropping the stream aborts the assembling task together with any request
/// it has in flight. Once the pipe is drained the task's outcome is checked:
/// a failed archive ends the stream with an error instead of a clean EOF, so
/// the consumer never mistakes a truncated archive for a complete one.
pub struct ArchiveStream {
    inner: ReaderStream<DuplexStream>,
    task: Option<JoinHandle<Result<ArchiveSummary, ArchiveError>>>,
    on_finish: Option<Box<dyn FnOnce() + Send>>,
}

impl ArchiveStream {
    pub(crate) fn new(
        reader: DuplexStream,
        task: JoinHandle<Result<ArchiveSummary, ArchiveError>>,
    ) -> Self {
        Self {
            inner: ReaderStream::new(reader),
            task: Some(task),
            on_finish: None,
        }
    }

    /// Run `callback` once when the stream ends or is dropped
    pub fn on_finish(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }

    fn finish(&mut self) {
        if let Some(callback) = self.on_finish.take() {
            callback();
        }
    }
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {}
            other => return other,
        }

        // Pipe closed: the writer is done, one way or the other
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(None);
        };

        let outcome = match Pin::new(task).poll(cx) {
            Poll::Ready(outcome) => outcome,
            Poll::Pending => return Poll::Pending,
        };
        self.task = None;
        self.finish();

        match outcome {
            Ok(Ok(_)) => Poll::Ready(None),
            Ok(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e)))),
            Err(e) => Poll::Ready(Some(Err(io::Error::other(e)))),
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Archive stream dropped before completion, assembly aborted");
        }
        self.finish();
    }
}
