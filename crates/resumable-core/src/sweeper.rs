//! Expiry sweeper. Has no scheduler of its own; callers trigger it on an
//! external cadence (hourly is typical).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::StoreError;
use crate::store::StreamStore;

/// Outcome of one sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub success: bool,
    pub deleted: u64,
    pub swept_at: DateTime<Utc>,
}

/// Deletes stream records whose expiry has passed, regardless of status.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn StreamStore>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self { store }
    }

    /// Deletes every record with `expires_at < now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let deleted = self.store.delete_expired(now).await?;
        info!(deleted, swept_at = %now, "expired streams swept");
        Ok(SweepReport {
            success: true,
            deleted,
            swept_at: now,
        })
    }

    /// Sweeps with the current wall-clock time.
    pub async fn sweep_now(&self) -> Result<SweepReport, StoreError> {
        self.sweep(Utc::now()).await
    }
}
