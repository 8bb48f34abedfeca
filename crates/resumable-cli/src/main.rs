//! Operator binary: attach to streams, sweep expired records, inspect the buffer.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures::StreamExt as _;
use resumable_core::{
    ConfigError, FragmentStream, MemoryStreamStore, Orchestrator, Settings, SourceMode,
    StreamStore, Sweeper, init_observability,
};
use resumable_postgres::PgStreamStore;
use resumable_sources::{UpstreamSource, build_source};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "resumable", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Produce or resume a stream and print fragments as they arrive.
    Attach {
        #[arg(long)]
        stream_id: String,
        /// Owning conversation recorded on a fresh generation.
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "")]
        prompt: String,
        /// Use a process-local store instead of PostgreSQL.
        #[arg(long)]
        memory: bool,
    },
    /// Delete expired stream records once and print the report.
    Sweep,
    /// Print buffer statistics.
    Stats,
    /// Create the stream table and index if missing.
    Migrate,
}

async fn pg_store(settings: &Settings) -> anyhow::Result<PgStreamStore> {
    let url = settings.require_database_url()?;
    PgStreamStore::connect(url, settings.stream_ttl)
        .await
        .context("connecting to PostgreSQL")
}

async fn attach(
    settings: Settings,
    stream_id: String,
    owner: Option<String>,
    prompt: String,
    memory: bool,
) -> anyhow::Result<()> {
    let store: Arc<dyn StreamStore> = if memory {
        Arc::new(MemoryStreamStore::with_ttl(settings.stream_ttl))
    } else {
        Arc::new(pg_store(&settings).await?)
    };
    let orchestrator = Orchestrator::new(store, settings.orchestrator)?;
    let mode = settings.source_mode;
    let mut out = open_stream(
        &orchestrator,
        stream_id,
        owner,
        mode,
        serde_json::json!({ "prompt": prompt }),
        move || match mode {
            SourceMode::Live => UpstreamSource::from_env().map(Some),
            SourceMode::Mock => Ok(None),
        },
    )
    .await?;
    info!(stream_id = %out.stream_id(), mode = ?out.mode(), "attached");

    let abort = out.abort_handle();
    let mut stdout = std::io::stdout().lock();
    loop {
        tokio::select! {
            next = out.next_fragment() => match next {
                Some(Ok(fragment)) => {
                    stdout.write_all(fragment.as_str().as_bytes())?;
                    stdout.flush()?;
                }
                Some(Err(e)) => return Err(e).context("stream failed"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                if let Some(abort) = &abort {
                    abort.abort();
                }
                break;
            }
        }
    }
    Ok(())
}

/// Attaches to `stream_id`. Upstream settings are only resolved when a fresh
/// generation has to be produced; resuming never needs them.
async fn open_stream<R>(
    orchestrator: &Orchestrator,
    stream_id: String,
    owner: Option<String>,
    mode: SourceMode,
    mut request_body: serde_json::Value,
    resolve_upstream: R,
) -> anyhow::Result<FragmentStream>
where
    R: FnOnce() -> Result<Option<UpstreamSource>, ConfigError> + Send,
{
    request_body["stream_id"] = serde_json::json!(stream_id);
    let mut setup_error = None;
    let factory = || {
        let source = resolve_upstream()
            .and_then(|upstream| build_source(mode, upstream.as_ref(), request_body));
        source.unwrap_or_else(|e| {
            setup_error = Some(e);
            futures::stream::empty().boxed()
        })
    };
    let out = match owner {
        Some(owner) => {
            orchestrator
                .attach_for_owner(stream_id.as_str(), owner, factory)
                .await?
        }
        None => orchestrator.attach(stream_id.as_str(), factory).await?,
    };
    // The producer is lazy: dropping it unpolled leaves the store untouched.
    if let Some(e) = setup_error {
        return Err(e).context("cannot start a fresh generation");
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_observability();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Attach {
            stream_id,
            owner,
            prompt,
            memory,
        } => attach(settings, stream_id, owner, prompt, memory).await?,
        Command::Sweep => {
            let store = pg_store(&settings).await?;
            let report = Sweeper::new(Arc::new(store)).sweep_now().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            let stats = pg_store(&settings).await?.stats().await?;
            let mut value = serde_json::to_value(&stats)?;
            value["total_streams"] = serde_json::json!(stats.total_streams());
            value["average_fragments"] = serde_json::json!(stats.average_fragments());
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Migrate => {
            pg_store(&settings).await?.ensure_schema().await?;
            println!("schema ready");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumable_core::{AttachMode, Fragment, OrchestratorConfig, ResumeConfig, StreamId};
    use std::time::Duration;

    fn missing_upstream() -> Result<Option<UpstreamSource>, ConfigError> {
        Err(ConfigError::Missing("RESUMABLE_UPSTREAM_URL".into()))
    }

    fn orchestrator(store: &MemoryStreamStore) -> Orchestrator {
        let config = OrchestratorConfig {
            resume: ResumeConfig::new(Duration::from_millis(200), Duration::from_millis(600)),
            verbose_logging: false,
        };
        Orchestrator::new(Arc::new(store.clone()), config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn resume_works_without_upstream_settings() {
        let store = MemoryStreamStore::new();
        let id = StreamId::new("s");
        store.open(&id, None).await.unwrap();
        store.append(&id, &"a".into()).await.unwrap();

        let out = open_stream(
            &orchestrator(&store),
            "s".into(),
            None,
            SourceMode::Live,
            serde_json::json!({}),
            missing_upstream,
        )
        .await
        .unwrap();
        assert_eq!(out.mode(), AttachMode::Resumed);
        assert_eq!(out.collect_fragments().await.unwrap(), vec![Fragment::from("a")]);
    }

    #[tokio::test]
    async fn fresh_generation_reports_missing_upstream_without_writing() {
        let store = MemoryStreamStore::new();
        let err = open_stream(
            &orchestrator(&store),
            "s".into(),
            Some("chat-1".into()),
            SourceMode::Live,
            serde_json::json!({}),
            missing_upstream,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("RESUMABLE_UPSTREAM_URL"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn mock_mode_produces_without_upstream() {
        let store = MemoryStreamStore::new();
        let out = open_stream(
            &orchestrator(&store),
            "s".into(),
            None,
            SourceMode::Mock,
            serde_json::json!({ "prompt": "hi there" }),
            || Ok(None),
        )
        .await
        .unwrap();
        assert_eq!(out.mode(), AttachMode::Produced);
        assert_eq!(out.collect_fragments().await.unwrap().len(), 3);
        assert!(store.get(&"s".into()).await.unwrap().unwrap().is_completed());
    }

    #[test]
    fn parses_attach_flags() {
        let cli = Cli::try_parse_from([
            "resumable",
            "attach",
            "--stream-id",
            "chat-1:msg-2",
            "--owner",
            "chat-1",
            "--memory",
        ])
        .unwrap();
        match cli.command {
            Command::Attach {
                stream_id,
                owner,
                prompt,
                memory,
            } => {
                assert_eq!(stream_id, "chat-1:msg-2");
                assert_eq!(owner.as_deref(), Some("chat-1"));
                assert_eq!(prompt, "");
                assert!(memory);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory as _;
        Cli::command().debug_assert();
    }
}
