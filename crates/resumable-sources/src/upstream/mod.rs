//! Live upstream event-stream source.

mod config;
mod decoder;
mod source;

pub use config::UpstreamConfig;
pub use decoder::{SseDecoder, SseFrame};
pub use source::{UpstreamSource, sse_fragments};
