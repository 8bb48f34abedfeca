//! Fragment source contract and the verbose-logging middleware.

use std::task::Poll;

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tracing::{info, warn};

use crate::errors::SourceError;
use crate::model::{Fragment, StreamId};

/// Lazy, finite, non-restartable sequence of fragments from a generator.
pub type FragmentSource = BoxStream<'static, Result<Fragment, SourceError>>;

const PREVIEW_CHARS: usize = 80;

/// Wraps `source` so its start (first poll), every fragment and the terminal
/// outcome are logged at `info` level. Fragments pass through unchanged.
pub fn with_logging(stream_id: StreamId, source: FragmentSource) -> FragmentSource {
    let mut index = 0_usize;
    let mut ended = false;
    let start_id = stream_id.clone();
    let end_id = stream_id.clone();
    let started = futures::stream::poll_fn(move |_| -> Poll<Option<Result<Fragment, SourceError>>> {
        info!(stream_id = %start_id, "=== fragment source started ===");
        Poll::Ready(None)
    });
    started
        .chain(source.inspect(move |item| {
            match item {
                Ok(fragment) => info!(
                    stream_id = %stream_id,
                    index,
                    bytes = fragment.len(),
                    preview = %preview(fragment.as_str()),
                    "source fragment"
                ),
                Err(err) => warn!(stream_id = %stream_id, index, error = %err, "source failed"),
            }
            index += 1;
        }))
        .chain(futures::stream::poll_fn(move |_| {
            if !ended {
                ended = true;
                info!(stream_id = %end_id, "=== fragment source ended ===");
            }
            Poll::Ready(None)
        }))
        .boxed()
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        out.push('…');
    }
    out.escape_debug().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_passes_fragments_through_unchanged() {
        let source: FragmentSource = futures::stream::iter(vec![
            Ok(Fragment::from("a")),
            Err(SourceError::transport("reset")),
        ])
        .boxed();
        let items: Vec<_> = with_logging("s".into(), source).collect().await;
        assert_eq!(
            items,
            vec![Ok(Fragment::from("a")), Err(SourceError::transport("reset"))]
        );
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_is_logged_on_first_poll_not_on_wrap() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let source: FragmentSource = futures::stream::iter(vec![Ok(Fragment::from("a"))]).boxed();
        let mut source = with_logging("s".into(), source);
        assert!(!logs.contents().contains("fragment source started"));

        assert_eq!(source.next().await, Some(Ok(Fragment::from("a"))));
        assert_eq!(logs.contents().matches("fragment source started").count(), 1);
        assert_eq!(source.next().await, None);
        assert!(logs.contents().contains("fragment source ended"));
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = "x".repeat(200);
        let shown = preview(&long);
        assert!(shown.starts_with("xxx"));
        assert!(shown.chars().count() <= PREVIEW_CHARS + 1);
        assert_eq!(preview("data: hi\n\n"), "data: hi\\n\\n");
    }
}
