//! Resumable stream buffering.
//!
//! A producer persists every fragment of an incrementally generated output to
//! a [`StreamStore`] while forwarding it; any later consumer can reconstruct the
//! output in progress by replaying what was buffered and then tailing the store
//! until the producer finishes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt as _;
//! use resumable_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let store = Arc::new(MemoryStreamStore::new());
//! let orchestrator = Orchestrator::new(store, OrchestratorConfig::default())
//!     .expect("default config is valid");
//!
//! let mut out = orchestrator
//!     .attach("chat-42:msg-7", || {
//!         let fragments = ["data: hi\n\n"].map(|f| Ok::<_, SourceError>(Fragment::from(f)));
//!         futures::stream::iter(fragments).boxed()
//!     })
//!     .await?;
//! while let Some(fragment) = out.next_fragment().await {
//!     print!("{}", fragment?);
//! }
//! # Ok(())
//! # }
//! ```

/// Poll, orchestrator and process settings.
pub mod config;
/// Error types shared by stores, sources and streams.
pub mod errors;
/// Stream records, fragments and identifiers.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Orchestrator entry point.
pub mod orchestrator;
/// Common imports for typical usage.
pub mod prelude;
/// Buffering producer.
pub mod producer;
/// Replay-then-tail resumer.
pub mod resumer;
/// Fragment source contract and logging middleware.
pub mod source;
/// Durable store contract and in-memory adapter.
pub mod store;
/// Fragment stream handle and abort handle.
pub mod stream;
/// Expiry sweeper.
pub mod sweeper;

pub use config::{OrchestratorConfig, ResumeConfig, Settings, SourceMode};
pub use errors::{ConfigError, SourceError, StoreError, StreamError};
pub use model::{Fragment, StreamId, StreamSlice, StreamState, StreamStatus};
pub use observability::init_observability;
pub use orchestrator::Orchestrator;
pub use producer::produce;
pub use resumer::{ResumeEnd, resume, resume_snapshot};
pub use source::{FragmentSource, with_logging};
pub use store::{DEFAULT_STREAM_TTL, MemoryStreamStore, StreamStore, expiry_after};
pub use stream::{AbortHandle, AttachMode, FragmentStream};
pub use sweeper::{SweepReport, Sweeper};
