//! Durable stream store contract and the in-memory adapter.
//!
//! All Producer/Resumer coordination goes through this trait; implementations
//! must make `append` atomic per stream id and must return prefix-consistent
//! reads (no gaps, no reordering).

mod memory;

pub use memory::MemoryStreamStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::model::{Fragment, StreamId, StreamSlice, StreamState};

/// Default lifetime of a stream record before the sweeper may delete it.
pub const DEFAULT_STREAM_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Persistence layer keyed by stream id.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Returns the full record, or `None` when absent (never written or swept).
    async fn get(&self, id: &StreamId) -> Result<Option<StreamState>, StoreError>;

    /// Returns fragments at index >= `offset` together with the current status.
    async fn read_from(
        &self,
        id: &StreamId,
        offset: usize,
    ) -> Result<Option<StreamSlice>, StoreError> {
        Ok(self.get(id).await?.map(|state| state.slice_from(offset)))
    }

    /// Starts a generation: creates the record when absent, resets it when
    /// completed, and fails with `AlreadyActive` otherwise.
    async fn open(&self, id: &StreamId, owner_ref: Option<&str>) -> Result<(), StoreError>;

    /// Appends one fragment. Creates the record when absent; fails with
    /// `NotActive` once the stream has completed.
    async fn append(&self, id: &StreamId, fragment: &Fragment) -> Result<(), StoreError>;

    /// Marks the stream completed. No-op when already completed or absent.
    async fn mark_completed(&self, id: &StreamId) -> Result<(), StoreError>;

    /// Deletes every record with `expires_at < now`, returning how many went.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Expiry timestamp for a record created at `created_at`, saturating at the
/// largest representable instant.
pub fn expiry_after(created_at: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
