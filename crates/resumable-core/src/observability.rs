use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

static INIT: OnceCell<()> = OnceCell::new();

fn observability_enabled() -> bool {
    match std::env::var("RESUMABLE_OBSERVABILITY_ENABLED") {
        Ok(value) => parse_bool(&value).unwrap_or(true),
        Err(_) => true,
    }
}

/// Lifecycle logs from this workspace, only warnings from dependencies
/// (sqlx statement logging, hyper connection chatter).
const DEFAULT_DIRECTIVES: &str =
    "warn,resumable_core=info,resumable_sources=info,resumable_postgres=info,resumable_cli=info";

fn resolve_env_filter() -> EnvFilter {
    build_filter(
        std::env::var("RESUMABLE_LOG_LEVEL").ok(),
        std::env::var("RUST_LOG").ok(),
    )
}

/// First parseable of `RESUMABLE_LOG_LEVEL` then `RUST_LOG`, else the defaults.
fn build_filter(level: Option<String>, rust_log: Option<String>) -> EnvFilter {
    [level, rust_log]
        .into_iter()
        .flatten()
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `RESUMABLE_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `RESUMABLE_LOG_LEVEL`: optional level/filter override (`info`, `resumable_core=debug`, etc.).
///   Without it (or `RUST_LOG`), workspace crates log at `info` and everything else at `warn`.
/// - `RESUMABLE_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format so stdout stays free for fragments.
/// - `RUST_LOG`: optional filter override.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("RESUMABLE_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("resumable.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
