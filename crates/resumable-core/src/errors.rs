use crate::model::StreamId;

/// Failures reported by a `StreamStore` adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backing store could not be reached or the operation failed in transit.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    /// Append attempted on a stream that has already completed.
    #[error("stream {stream_id} is not active")]
    NotActive { stream_id: StreamId },
    /// Open attempted on a stream that still has a live generation.
    #[error("stream {stream_id} already has an active generation")]
    AlreadyActive { stream_id: StreamId },
    /// Stored record could not be decoded.
    #[error("corrupt record for stream {stream_id}: {message}")]
    Corrupt { stream_id: StreamId, message: String },
}

impl StoreError {
    /// Creates an availability error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a decoding error for `stream_id`.
    pub fn corrupt(stream_id: &StreamId, message: impl Into<String>) -> Self {
        Self::Corrupt {
            stream_id: stream_id.clone(),
            message: message.into(),
        }
    }
}

/// Failures raised by a fragment source mid-generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Upstream generator returned an application-level failure.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or byte stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Upstream output could not be framed.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl SourceError {
    pub fn upstream(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Upstream {
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Upstream { message, .. }
            | Self::Transport { message }
            | Self::Protocol { message } => message,
        }
    }
}

/// Error yielded by a `FragmentStream`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
