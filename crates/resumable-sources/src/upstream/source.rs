use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use resumable_core::{ConfigError, Fragment, FragmentSource, SourceError};
use tracing::debug;

use super::config::UpstreamConfig;
use super::decoder::SseDecoder;

type ByteStream<E> =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static>>;

/// Live fragment source backed by an upstream event-stream endpoint.
#[derive(Clone)]
pub struct UpstreamSource {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamSource {
    pub fn new(config: UpstreamConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build upstream client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(UpstreamConfig::from_env()?)
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Returns a source that POSTs `body` on first poll and yields one
    /// fragment per decoded event.
    pub fn stream(&self, body: serde_json::Value) -> FragmentSource {
        let client = self.client.clone();
        let config = self.config.clone();
        stream::once(async move { connect(client, config, body).await })
            .flat_map(|connected| match connected {
                Ok(bytes) => sse_fragments(bytes),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}

async fn connect(
    client: reqwest::Client,
    config: UpstreamConfig,
    body: serde_json::Value,
) -> Result<ByteStream<reqwest::Error>, SourceError> {
    debug!(url = %config.url, "starting upstream stream");
    let mut request = client
        .post(&config.url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(&body);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::transport(format!("upstream request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(SourceError::upstream(
            format!("upstream request failed with status {status}: {body}"),
            Some(status.as_u16()),
        ));
    }
    Ok(Box::pin(response.bytes_stream()))
}

/// Decodes an event-stream byte stream into wire fragments, one per event.
pub fn sse_fragments<E>(bytes: ByteStream<E>) -> FragmentSource
where
    E: Display + Send + 'static,
{
    struct State<E> {
        bytes: ByteStream<E>,
        decoder: SseDecoder,
        pending: VecDeque<Fragment>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Ok(Some((fragment, state)));
                }
                if state.done {
                    if state.decoder.pending_len() > 0 {
                        debug!(
                            trailing_bytes = state.decoder.pending_len(),
                            "upstream ended mid-frame"
                        );
                    }
                    return Ok(None);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            state.pending.push_back(Fragment::new(frame.to_wire()));
                        }
                    }
                    Some(Err(e)) => {
                        return Err(SourceError::transport(format!(
                            "upstream streaming read failed: {e}"
                        )));
                    }
                    None => state.done = true,
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<Result<&'static str, &'static str>>) -> ByteStream<&'static str> {
        Box::pin(stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| bytes::Bytes::from_static(s.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn one_fragment_per_event() {
        let source = sse_fragments(chunks(vec![
            Ok("data: {\"delta\":\"a\"}\n\nda"),
            Ok("ta: {\"delta\":\"b\"}\n\n: ping\n\n"),
            Ok("data: [DONE]\n\n"),
        ]));
        let out: Vec<Fragment> = source.map(Result::unwrap).collect().await;
        assert_eq!(
            out,
            vec![
                Fragment::from("data: {\"delta\":\"a\"}\n\n"),
                "data: {\"delta\":\"b\"}\n\n".into(),
                "data: [DONE]\n\n".into(),
            ]
        );
    }

    #[tokio::test]
    async fn read_failure_becomes_transport_error() {
        let source = sse_fragments(chunks(vec![Ok("data: a\n\n"), Err("connection reset")]));
        let out: Vec<_> = source.collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok("data: a\n\n".into()));
        assert!(matches!(
            &out[1],
            Err(SourceError::Transport { message }) if message.contains("connection reset")
        ));
    }

    #[tokio::test]
    async fn request_is_not_sent_until_polled() {
        let upstream = UpstreamSource::new(UpstreamConfig::new("http://127.0.0.1:1/stream"))
            .expect("client");
        let mut source = upstream.stream(serde_json::json!({"prompt": "hi"}));
        // Building the source does no I/O; the refused connection only shows up on poll.
        let first = source.next().await;
        assert!(matches!(first, Some(Err(SourceError::Transport { .. }))));
        assert!(source.next().await.is_none());
    }
}
