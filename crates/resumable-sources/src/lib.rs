//! Fragment sources for the resumable stream orchestrator.
//!
//! [`ScriptedSource`] and [`mock_reply`] produce deterministic output for tests
//! and the `mock` source mode; [`UpstreamSource`] relays a live upstream
//! event stream one event per fragment.

mod scripted;
pub mod upstream;

pub use scripted::{ScriptedSource, mock_reply};
pub use upstream::{UpstreamConfig, UpstreamSource};

use resumable_core::{ConfigError, FragmentSource, SourceMode};

/// Selects the fragment source for a fresh generation.
///
/// In `Mock` mode the reply echoes the request body's `prompt` field; in
/// `Live` mode the body is forwarded to `upstream`, which must be configured.
pub fn build_source(
    mode: SourceMode,
    upstream: Option<&UpstreamSource>,
    request_body: serde_json::Value,
) -> Result<FragmentSource, ConfigError> {
    match mode {
        SourceMode::Mock => {
            let prompt = request_body
                .get("prompt")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(mock_reply(prompt))
        }
        SourceMode::Live => {
            let upstream = upstream
                .ok_or_else(|| ConfigError::Missing("RESUMABLE_UPSTREAM_URL".into()))?;
            Ok(upstream.stream(request_body))
        }
    }
}
