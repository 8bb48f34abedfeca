use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied identifier for one logical generation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub String);

impl StreamId {
    /// Creates a stream id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the stream id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// One opaque, wire-formatted unit of incremental output.
///
/// The core never looks inside a fragment; it is stored and replayed verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fragment(String);

impl Fragment {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fragment {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Fragment {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a buffered stream. Transitions only `Active -> Completed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Active,
    Completed,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Active => "active",
            StreamStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StreamStatus::Active),
            "completed" => Ok(StreamStatus::Completed),
            other => Err(format!("unknown stream status: {other}")),
        }
    }
}

/// Full durable record for one stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub id: StreamId,
    /// Owning conversation/session. Not interpreted here.
    pub owner_ref: Option<String>,
    pub status: StreamStatus,
    /// Append-only, indexed by arrival order.
    pub fragments: Vec<Fragment>,
    pub created_at: DateTime<Utc>,
    pub last_fragment_at: Option<DateTime<Utc>>,
    /// Eligible for deletion once this passes, regardless of status.
    pub expires_at: DateTime<Utc>,
}

impl StreamState {
    /// Creates an empty active record expiring at `expires_at`.
    pub fn new(
        id: StreamId,
        owner_ref: Option<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_ref,
            status: StreamStatus::Active,
            fragments: Vec::new(),
            created_at,
            last_fragment_at: None,
            expires_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StreamStatus::Completed
    }

    /// Tail view starting at `offset`.
    pub fn slice_from(&self, offset: usize) -> StreamSlice {
        let fragments = self
            .fragments
            .get(offset..)
            .map(<[Fragment]>::to_vec)
            .unwrap_or_default();
        StreamSlice {
            status: self.status,
            offset,
            total: self.fragments.len(),
            created_at: self.created_at,
            fragments,
        }
    }
}

/// Fragments at index >= `offset` plus the status observed in the same read.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSlice {
    pub status: StreamStatus,
    pub offset: usize,
    /// Total fragment count of the record at read time.
    pub total: usize,
    /// Creation time of the generation read. Reset by every `open`.
    pub created_at: DateTime<Utc>,
    pub fragments: Vec<Fragment>,
}
