//! Resumer: replays a buffered snapshot, then tails the store until the
//! stream completes, disappears, or the poll budget runs out.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream;
use tokio::sync::watch;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ResumeConfig;
use crate::errors::StreamError;
use crate::model::{Fragment, StreamId, StreamState, StreamStatus};
use crate::store::StreamStore;
use crate::stream::{AbortHandle, AttachMode, FragmentStream};

/// Why a resumed sequence ended. Every variant is a clean end of stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResumeEnd {
    /// The producer marked the stream completed.
    Completed,
    /// The record was deleted or expired while polling.
    Absent,
    /// A new generation replaced the one being tailed.
    Reset,
    /// The poll budget ran out while the stream was still active.
    Timeout,
    /// The caller requested an abort.
    Aborted,
}

impl ResumeEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeEnd::Completed => "completed",
            ResumeEnd::Absent => "absent",
            ResumeEnd::Reset => "reset",
            ResumeEnd::Timeout => "timeout",
            ResumeEnd::Aborted => "aborted",
        }
    }
}

enum Phase {
    /// Buffered snapshot is still being handed out.
    Replay,
    /// Tailing the store; `deadline` is fixed at loop entry.
    Polling { deadline: Instant, polls: u32 },
    Finished,
}

struct State {
    store: Arc<dyn StreamStore>,
    stream_id: StreamId,
    config: ResumeConfig,
    pending: VecDeque<Fragment>,
    next_index: usize,
    /// `created_at` of the generation being tailed.
    generation: Option<DateTime<Utc>>,
    phase: Phase,
    abort_rx: watch::Receiver<bool>,
}

impl State {
    fn finish(&mut self, reason: ResumeEnd) {
        info!(
            stream_id = %self.stream_id,
            reason = reason.as_str(),
            delivered = self.next_index,
            "resumed stream ended"
        );
        self.phase = Phase::Finished;
    }

    fn aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    /// Sleeps one poll interval. Returns false when aborted first.
    async fn wait_interval(&mut self) -> bool {
        if self.aborted() {
            return false;
        }
        let interval = self.config.poll_interval;
        let signalled = tokio::select! {
            changed = self.abort_rx.changed() => Some(changed.is_ok()),
            _ = tokio::time::sleep(interval) => None,
        };
        match signalled {
            None => true,
            Some(true) => !self.aborted(),
            // Every sender dropped; nobody can abort any more.
            Some(false) => {
                tokio::time::sleep(interval).await;
                true
            }
        }
    }

    /// Runs one poll-loop step. Either queues fragments, finishes, or errors.
    async fn poll_step(&mut self) -> Result<(), StreamError> {
        let Phase::Polling { deadline, polls } = self.phase else {
            return Ok(());
        };

        if polls > 0 && !self.wait_interval().await {
            self.finish(ResumeEnd::Aborted);
            return Ok(());
        }
        if self.aborted() {
            self.finish(ResumeEnd::Aborted);
            return Ok(());
        }
        if Instant::now() >= deadline {
            self.finish(ResumeEnd::Timeout);
            return Ok(());
        }

        self.phase = Phase::Polling {
            deadline,
            polls: polls + 1,
        };
        let Some(slice) = self.store.read_from(&self.stream_id, self.next_index).await? else {
            self.finish(ResumeEnd::Absent);
            return Ok(());
        };
        match self.generation {
            Some(generation) if generation != slice.created_at => {
                self.finish(ResumeEnd::Reset);
                return Ok(());
            }
            Some(_) => {}
            None => self.generation = Some(slice.created_at),
        }
        if slice.total < self.next_index {
            self.finish(ResumeEnd::Reset);
            return Ok(());
        }

        if !slice.fragments.is_empty() {
            debug!(
                stream_id = %self.stream_id,
                from = self.next_index,
                count = slice.fragments.len(),
                "tailed new fragments"
            );
        }
        self.next_index += slice.fragments.len();
        self.pending.extend(slice.fragments);
        if slice.status == StreamStatus::Completed {
            self.finish(ResumeEnd::Completed);
        }
        Ok(())
    }
}

/// Produces `buffered` in order, then polls `store` for fragments appended
/// after that snapshot.
///
/// The poll budget (`config.max_poll_duration`) is measured from the moment
/// the snapshot has been fully consumed. Completion, record absence, budget
/// exhaustion and abort all end the sequence cleanly; a store read failure is
/// yielded as the single terminal error.
///
/// The generation being tailed is pinned at the first poll. Prefer
/// [`resume_snapshot`] when the snapshot came from a store read, so a
/// generation swapped in before that poll is caught too.
pub fn resume(
    store: Arc<dyn StreamStore>,
    stream_id: StreamId,
    buffered: Vec<Fragment>,
    config: ResumeConfig,
) -> FragmentStream {
    resume_inner(store, stream_id, buffered, None, config)
}

/// Same as [`resume`], replaying `snapshot.fragments` and ending as a reset
/// as soon as the record no longer belongs to `snapshot`'s generation.
pub fn resume_snapshot(
    store: Arc<dyn StreamStore>,
    snapshot: StreamState,
    config: ResumeConfig,
) -> FragmentStream {
    resume_inner(
        store,
        snapshot.id,
        snapshot.fragments,
        Some(snapshot.created_at),
        config,
    )
}

fn resume_inner(
    store: Arc<dyn StreamStore>,
    stream_id: StreamId,
    buffered: Vec<Fragment>,
    generation: Option<DateTime<Utc>>,
    config: ResumeConfig,
) -> FragmentStream {
    let (abort_handle, abort_rx) = AbortHandle::new();
    let next_index = buffered.len();
    debug!(stream_id = %stream_id, replay = next_index, "resuming stream");

    let inner = stream::try_unfold(
        State {
            store,
            stream_id: stream_id.clone(),
            config,
            pending: buffered.into(),
            next_index,
            generation,
            phase: Phase::Replay,
            abort_rx,
        },
        |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Ok(Some((fragment, state)));
                }
                match state.phase {
                    Phase::Finished => return Ok(None),
                    Phase::Replay => {
                        state.phase = Phase::Polling {
                            deadline: Instant::now() + state.config.max_poll_duration,
                            polls: 0,
                        };
                    }
                    Phase::Polling { .. } => state.poll_step().await?,
                }
            }
        },
    );

    FragmentStream::new(
        stream_id,
        AttachMode::Resumed,
        inner.boxed(),
        Some(abort_handle),
    )
}
