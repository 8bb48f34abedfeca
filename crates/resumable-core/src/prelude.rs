//! Common imports for typical usage.
pub use crate::{
    AbortHandle, AttachMode, Fragment, FragmentSource, FragmentStream, MemoryStreamStore,
    Orchestrator, OrchestratorConfig, ResumeConfig, SourceError, StoreError, StreamError,
    StreamId, StreamStore, Sweeper,
};
