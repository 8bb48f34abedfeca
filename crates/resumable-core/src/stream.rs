use std::pin::Pin;
use std::task::{Context, Poll};

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::sync::watch;

use crate::errors::StreamError;
use crate::model::{Fragment, StreamId};

/// Which path the orchestrator took for an attach.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachMode {
    /// A fresh generation is running and being buffered.
    Produced,
    /// Buffered fragments are replayed, then new ones are tailed.
    Resumed,
}

/// Handle used to stop a resumer's poll loop early.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Requests that the stream end at its next suspension point.
    ///
    /// The sequence ends cleanly; no store state changes.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Lazy, finite sequence of fragments returned by the producer and resumer.
///
/// Dropping the handle cancels the underlying work. Errors are terminal: the
/// stream yields at most one `Err` and then ends.
pub struct FragmentStream {
    stream_id: StreamId,
    mode: AttachMode,
    inner: BoxStream<'static, Result<Fragment, StreamError>>,
    abort_handle: Option<AbortHandle>,
}

impl FragmentStream {
    pub(crate) fn new(
        stream_id: StreamId,
        mode: AttachMode,
        inner: BoxStream<'static, Result<Fragment, StreamError>>,
        abort_handle: Option<AbortHandle>,
    ) -> Self {
        Self {
            stream_id,
            mode,
            inner,
            abort_handle,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn mode(&self) -> AttachMode {
        self.mode
    }

    /// Returns an abort handle for resumed streams. Produced streams are
    /// cancelled by dropping them.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort_handle.clone()
    }

    /// Waits for the next fragment. Returns `None` at end of stream.
    pub async fn next_fragment(&mut self) -> Option<Result<Fragment, StreamError>> {
        self.inner.next().await
    }

    /// Drains the stream and returns every fragment, or the terminal error.
    pub async fn collect_fragments(mut self) -> Result<Vec<Fragment>, StreamError> {
        let mut fragments = Vec::new();
        while let Some(next) = self.inner.next().await {
            fragments.push(next?);
        }
        Ok(fragments)
    }
}

impl futures::Stream for FragmentStream {
    type Item = Result<Fragment, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("stream_id", &self.stream_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
