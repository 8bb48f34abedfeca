use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::{DEFAULT_STREAM_TTL, StreamStore, expiry_after};
use crate::errors::StoreError;
use crate::model::{Fragment, StreamId, StreamSlice, StreamState, StreamStatus};

/// In-process stream store for tests and single-node use.
///
/// Clones share the same map, so a producer and any number of resumers can
/// be handed separate handles.
#[derive(Clone, Debug)]
pub struct MemoryStreamStore {
    streams: Arc<DashMap<StreamId, StreamState>>,
    ttl: Duration,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STREAM_TTL)
    }

    /// Creates a store whose new records expire `ttl` after creation.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Inserts or replaces a record verbatim. Intended for seeding fixtures.
    pub fn insert(&self, state: StreamState) {
        self.streams.insert(state.id.clone(), state);
    }

    /// Removes a record outright, as an external deletion would.
    pub fn remove(&self, id: &StreamId) -> Option<StreamState> {
        self.streams.remove(id).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn fresh_state(&self, id: &StreamId, owner_ref: Option<&str>) -> StreamState {
        let now = Utc::now();
        StreamState::new(
            id.clone(),
            owner_ref.map(ToOwned::to_owned),
            now,
            expiry_after(now, self.ttl),
        )
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn get(&self, id: &StreamId) -> Result<Option<StreamState>, StoreError> {
        Ok(self.streams.get(id).map(|entry| entry.value().clone()))
    }

    async fn read_from(
        &self,
        id: &StreamId,
        offset: usize,
    ) -> Result<Option<StreamSlice>, StoreError> {
        Ok(self.streams.get(id).map(|entry| entry.slice_from(offset)))
    }

    async fn open(&self, id: &StreamId, owner_ref: Option<&str>) -> Result<(), StoreError> {
        match self.streams.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().status == StreamStatus::Active {
                    return Err(StoreError::AlreadyActive {
                        stream_id: id.clone(),
                    });
                }
                debug!(stream_id = %id, "resetting completed stream for new generation");
                let mut state = self.fresh_state(id, owner_ref);
                // Generations are told apart by `created_at`; keep it strictly increasing.
                let floor = entry.get().created_at + TimeDelta::microseconds(1);
                if state.created_at < floor {
                    state.created_at = floor;
                }
                entry.insert(state);
            }
            Entry::Vacant(entry) => {
                entry.insert(self.fresh_state(id, owner_ref));
            }
        }
        Ok(())
    }

    async fn append(&self, id: &StreamId, fragment: &Fragment) -> Result<(), StoreError> {
        let mut entry = self
            .streams
            .entry(id.clone())
            .or_insert_with(|| self.fresh_state(id, None));
        if entry.status != StreamStatus::Active {
            return Err(StoreError::NotActive {
                stream_id: id.clone(),
            });
        }
        entry.fragments.push(fragment.clone());
        entry.last_fragment_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_completed(&self, id: &StreamId) -> Result<(), StoreError> {
        if let Some(mut entry) = self.streams.get_mut(id) {
            entry.status = StreamStatus::Completed;
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0_u64;
        self.streams.retain(|_, state| {
            let keep = state.expires_at >= now;
            if !keep {
                deleted += 1;
            }
            keep
        });
        Ok(deleted)
    }
}
