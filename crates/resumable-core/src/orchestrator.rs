use std::sync::Arc;

use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::errors::{ConfigError, StreamError};
use crate::model::{StreamId, StreamStatus};
use crate::producer::produce;
use crate::resumer::resume_snapshot;
use crate::source::{FragmentSource, with_logging};
use crate::store::StreamStore;
use crate::stream::FragmentStream;

/// Entry point for request handlers: starts a fresh generation or attaches to
/// the live one, depending on what the store currently holds.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StreamStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator over `store`. Fails when the resume settings
    /// are unusable (zero interval or budget).
    pub fn new(
        store: Arc<dyn StreamStore>,
        config: OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        config.resume.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StreamStore> {
        &self.store
    }

    /// Attaches to `stream_id`.
    ///
    /// An absent or completed stream gets a fresh source from `factory` and is
    /// produced; an active one is resumed from its buffered fragments. The
    /// factory is only invoked on the produce path.
    pub async fn attach<F>(
        &self,
        stream_id: impl Into<StreamId>,
        factory: F,
    ) -> Result<FragmentStream, StreamError>
    where
        F: FnOnce() -> FragmentSource + Send,
    {
        self.attach_inner(stream_id.into(), None, factory).await
    }

    /// Same as [`Orchestrator::attach`], recording `owner_ref` on a fresh
    /// generation.
    pub async fn attach_for_owner<F>(
        &self,
        stream_id: impl Into<StreamId>,
        owner_ref: impl Into<String>,
        factory: F,
    ) -> Result<FragmentStream, StreamError>
    where
        F: FnOnce() -> FragmentSource + Send,
    {
        self.attach_inner(stream_id.into(), Some(owner_ref.into()), factory)
            .await
    }

    async fn attach_inner<F>(
        &self,
        stream_id: StreamId,
        owner_ref: Option<String>,
        factory: F,
    ) -> Result<FragmentStream, StreamError>
    where
        F: FnOnce() -> FragmentSource + Send,
    {
        let state = self.store.get(&stream_id).await?;
        match state {
            Some(state) if state.status == StreamStatus::Active => {
                info!(
                    stream_id = %stream_id,
                    buffered = state.fragments.len(),
                    "attaching resumer to active stream"
                );
                Ok(resume_snapshot(self.store.clone(), state, self.config.resume))
            }
            previous => {
                info!(
                    stream_id = %stream_id,
                    restart = previous.is_some(),
                    "starting producer"
                );
                let mut source = factory();
                if self.config.verbose_logging {
                    debug!(stream_id = %stream_id, "verbose fragment logging enabled");
                    source = with_logging(stream_id.clone(), source);
                }
                Ok(produce(self.store.clone(), stream_id, owner_ref, source))
            }
        }
    }
}
