use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use resumable_core::{Fragment, FragmentSource, SourceError};

/// Deterministic fragment source over a fixed script.
///
/// Used by tests and by the `mock` source mode.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSource {
    fragments: Vec<Fragment>,
    delay: Option<Duration>,
    fail_after: Option<(usize, SourceError)>,
    hang: bool,
}

impl ScriptedSource {
    pub fn new<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Fragment>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sleeps `delay` before yielding each fragment.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Yields `error` once `count` fragments have been emitted, then ends.
    pub fn fail_after(mut self, count: usize, error: SourceError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    /// Never ends after the last fragment. Models a producer that stalls.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn into_source(self) -> FragmentSource {
        struct Cursor {
            pending: VecDeque<Fragment>,
            emitted: usize,
            delay: Option<Duration>,
            fail_after: Option<(usize, SourceError)>,
            hang: bool,
            done: bool,
        }

        let cursor = Cursor {
            pending: self.fragments.into(),
            emitted: 0,
            delay: self.delay,
            fail_after: self.fail_after,
            hang: self.hang,
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return None;
            }
            if let Some((count, error)) = &cursor.fail_after
                && cursor.emitted >= *count
            {
                let error = error.clone();
                cursor.done = true;
                return Some((Err(error), cursor));
            }
            match cursor.pending.pop_front() {
                Some(fragment) => {
                    if let Some(delay) = cursor.delay {
                        tokio::time::sleep(delay).await;
                    }
                    cursor.emitted += 1;
                    Some((Ok(fragment), cursor))
                }
                None if cursor.hang => {
                    std::future::pending::<()>().await;
                    None
                }
                None => None,
            }
        })
        .boxed()
    }
}

/// Canned event-stream reply: one `data:` event per word of `prompt`, then a
/// `[DONE]` terminator.
pub fn mock_reply(prompt: &str) -> FragmentSource {
    let words: Vec<&str> = prompt.split_whitespace().collect();
    let mut fragments = Vec::with_capacity(words.len() + 1);
    for (i, word) in words.iter().enumerate() {
        let delta = if i + 1 < words.len() {
            format!("{word} ")
        } else {
            (*word).to_string()
        };
        let event = serde_json::json!({ "type": "text-delta", "delta": delta });
        fragments.push(Fragment::new(format!("data: {event}\n\n")));
    }
    fragments.push(Fragment::from("data: [DONE]\n\n"));
    ScriptedSource::new(fragments).into_source()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(source: FragmentSource) -> Vec<Result<Fragment, SourceError>> {
        source.collect().await
    }

    #[tokio::test]
    async fn yields_script_in_order() {
        let out = drain(ScriptedSource::new(["a", "b", "c"]).into_source()).await;
        let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec![Fragment::from("a"), "b".into(), "c".into()]);
    }

    #[tokio::test]
    async fn fails_after_configured_count() {
        let out = drain(
            ScriptedSource::new(["a", "b", "c"])
                .fail_after(2, SourceError::upstream("boom", Some(500)))
                .into_source(),
        )
        .await;
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok() && out[1].is_ok());
        assert_eq!(out[2], Err(SourceError::upstream("boom", Some(500))));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_applies_per_fragment() {
        let start = tokio::time::Instant::now();
        let out = drain(
            ScriptedSource::new(["a", "b"])
                .delay(Duration::from_millis(100))
                .into_source(),
        )
        .await;
        assert_eq!(out.len(), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_never_ends() {
        let mut source = ScriptedSource::new(["a"]).hang().into_source();
        assert_eq!(source.next().await, Some(Ok("a".into())));
        let next = tokio::time::timeout(Duration::from_secs(3600), source.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn mock_reply_emits_word_events_and_terminator() {
        let out: Vec<_> = drain(mock_reply("hello there"))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out.len(), 3);
        assert!(out[0].as_str().starts_with("data: "));
        assert!(out[0].as_str().contains("\"delta\":\"hello \""));
        assert!(out[1].as_str().contains("\"delta\":\"there\""));
        assert_eq!(out[2].as_str(), "data: [DONE]\n\n");
    }
}
