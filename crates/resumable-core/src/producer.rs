//! Producer: buffers every fragment of a fresh generation while forwarding it.

use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, info, warn};

use crate::errors::StreamError;
use crate::model::StreamId;
use crate::source::FragmentSource;
use crate::store::StreamStore;
use crate::stream::{AttachMode, FragmentStream};

/// Wraps `source` so each fragment is appended to `store` before it is
/// yielded downstream.
///
/// - Source exhaustion marks the stream completed and ends cleanly.
/// - Source failure marks the stream completed, then yields the error.
/// - A store failure is yielded as-is; no completion is attempted.
/// - Dropping the returned stream drops the source and stops appending; the
///   record stays `active` so a later resumer can still pick it up.
///
/// Nothing happens until the returned stream is first polled.
pub fn produce(
    store: Arc<dyn StreamStore>,
    stream_id: StreamId,
    owner_ref: Option<String>,
    source: FragmentSource,
) -> FragmentStream {
    struct State {
        store: Arc<dyn StreamStore>,
        stream_id: StreamId,
        owner_ref: Option<String>,
        source: FragmentSource,
        opened: bool,
        appended: usize,
    }

    let inner = stream::try_unfold(
        State {
            store,
            stream_id: stream_id.clone(),
            owner_ref,
            source,
            opened: false,
            appended: 0,
        },
        |mut state| async move {
            if !state.opened {
                state
                    .store
                    .open(&state.stream_id, state.owner_ref.as_deref())
                    .await?;
                state.opened = true;
                info!(stream_id = %state.stream_id, "stream generation opened");
            }

            match state.source.next().await {
                Some(Ok(fragment)) => {
                    state.store.append(&state.stream_id, &fragment).await?;
                    debug!(
                        stream_id = %state.stream_id,
                        index = state.appended,
                        bytes = fragment.len(),
                        "fragment buffered"
                    );
                    state.appended += 1;
                    Ok(Some((fragment, state)))
                }
                Some(Err(err)) => {
                    // Completion must still be recorded so resumers stop polling.
                    if let Err(store_err) = state.store.mark_completed(&state.stream_id).await {
                        warn!(
                            stream_id = %state.stream_id,
                            error = %store_err,
                            "failed to mark stream completed after source failure"
                        );
                    }
                    warn!(
                        stream_id = %state.stream_id,
                        fragments = state.appended,
                        error = %err,
                        "fragment source failed"
                    );
                    Err(StreamError::Source(err))
                }
                None => {
                    state.store.mark_completed(&state.stream_id).await?;
                    info!(
                        stream_id = %state.stream_id,
                        fragments = state.appended,
                        "stream completed"
                    );
                    Ok(None)
                }
            }
        },
    );

    FragmentStream::new(stream_id, AttachMode::Produced, inner.boxed(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SourceError, StoreError};
    use crate::model::{Fragment, StreamState, StreamStatus};
    use crate::store::MemoryStreamStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fragments(items: &[&str]) -> Vec<Fragment> {
        items.iter().map(|f| Fragment::from(*f)).collect()
    }

    fn source_of(items: Vec<Result<Fragment, SourceError>>) -> FragmentSource {
        stream::iter(items).boxed()
    }

    /// Memory store that counts completions and can fail appends.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStreamStore,
        completions: AtomicUsize,
        fail_append_at: Option<usize>,
        appends: AtomicUsize,
    }

    #[async_trait]
    impl StreamStore for CountingStore {
        async fn get(&self, id: &StreamId) -> Result<Option<StreamState>, StoreError> {
            self.inner.get(id).await
        }

        async fn open(&self, id: &StreamId, owner_ref: Option<&str>) -> Result<(), StoreError> {
            self.inner.open(id, owner_ref).await
        }

        async fn append(&self, id: &StreamId, fragment: &Fragment) -> Result<(), StoreError> {
            let n = self.appends.fetch_add(1, Ordering::SeqCst);
            if self.fail_append_at == Some(n) {
                return Err(StoreError::unavailable("connection refused"));
            }
            self.inner.append(id, fragment).await
        }

        async fn mark_completed(&self, id: &StreamId) -> Result<(), StoreError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            self.inner.mark_completed(id).await
        }

        async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_expired(now).await
        }
    }

    #[tokio::test]
    async fn forwards_and_buffers_then_completes() {
        let store = Arc::new(CountingStore::default());
        let id = StreamId::new("s");
        let out = produce(
            store.clone(),
            id.clone(),
            Some("chat-9".into()),
            source_of(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]),
        );
        assert_eq!(out.mode(), AttachMode::Produced);

        let got = out.collect_fragments().await.expect("clean end");
        assert_eq!(got, fragments(&["a", "b", "c"]));

        let state = store.get(&id).await.unwrap().expect("record");
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.fragments, fragments(&["a", "b", "c"]));
        assert_eq!(state.owner_ref.as_deref(), Some("chat-9"));
        assert_eq!(store.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_source_still_creates_and_completes_record() {
        let store = Arc::new(CountingStore::default());
        let id = StreamId::new("empty");
        let got = produce(store.clone(), id.clone(), None, source_of(vec![]))
            .collect_fragments()
            .await
            .unwrap();
        assert!(got.is_empty());
        let state = store.get(&id).await.unwrap().expect("record");
        assert!(state.is_completed());
    }

    #[tokio::test]
    async fn source_failure_completes_then_propagates() {
        let store = Arc::new(CountingStore::default());
        let id = StreamId::new("s");
        let mut out = produce(
            store.clone(),
            id.clone(),
            None,
            source_of(vec![
                Ok("a".into()),
                Err(SourceError::upstream("model overloaded", Some(529))),
                Ok("never".into()),
            ]),
        );

        assert_eq!(out.next_fragment().await, Some(Ok("a".into())));
        assert!(matches!(
            out.next_fragment().await,
            Some(Err(StreamError::Source(SourceError::Upstream { .. })))
        ));
        assert_eq!(out.next_fragment().await, None);

        let state = store.get(&id).await.unwrap().unwrap();
        assert!(state.is_completed());
        assert_eq!(state.fragments, fragments(&["a"]));
        assert_eq!(store.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_failure_propagates_without_completion() {
        let store = Arc::new(CountingStore {
            fail_append_at: Some(1),
            ..Default::default()
        });
        let id = StreamId::new("s");
        let result = produce(
            store.clone(),
            id.clone(),
            None,
            source_of(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]),
        )
        .collect_fragments()
        .await;

        assert!(matches!(
            result,
            Err(StreamError::Store(StoreError::Unavailable { .. }))
        ));
        assert_eq!(store.completions.load(Ordering::SeqCst), 0);
        let state = store.get(&id).await.unwrap().unwrap();
        assert_eq!(state.status, StreamStatus::Active);
        assert_eq!(state.fragments, fragments(&["a"]));
    }

    #[tokio::test]
    async fn cancellation_leaves_stream_active() {
        let store = Arc::new(CountingStore::default());
        let id = StreamId::new("s");
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::iter(vec!["a", "b", "c", "d"])
            .map(move |f| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Fragment::from(f))
            })
            .boxed();

        let mut out = produce(store.clone(), id.clone(), None, source);
        assert_eq!(out.next_fragment().await, Some(Ok("a".into())));
        assert_eq!(out.next_fragment().await, Some(Ok("b".into())));
        drop(out);

        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert_eq!(store.completions.load(Ordering::SeqCst), 0);
        let state = store.get(&id).await.unwrap().unwrap();
        assert_eq!(state.status, StreamStatus::Active);
        assert_eq!(state.fragments, fragments(&["a", "b"]));
    }

    #[tokio::test]
    async fn nothing_is_written_until_polled() {
        let store = Arc::new(CountingStore::default());
        let id = StreamId::new("lazy");
        let out = produce(store.clone(), id.clone(), None, source_of(vec![Ok("a".into())]));
        assert!(store.get(&id).await.unwrap().is_none());
        drop(out);
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn producing_over_active_generation_is_rejected() {
        let store = Arc::new(MemoryStreamStore::new());
        let id = StreamId::new("busy");
        store.append(&id, &"x".into()).await.unwrap();
        let result = produce(store.clone(), id.clone(), None, source_of(vec![Ok("y".into())]))
            .collect_fragments()
            .await;
        assert!(matches!(
            result,
            Err(StreamError::Store(StoreError::AlreadyActive { .. }))
        ));
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().fragments,
            fragments(&["x"])
        );
    }
}
