use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::store::DEFAULT_STREAM_TTL;

/// Poll cadence and budget for the resumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Sleep between store reads.
    pub poll_interval: Duration,
    /// Hard wall-clock budget for the poll loop, measured from loop entry.
    pub max_poll_duration: Duration,
}

impl ResumeConfig {
    pub fn new(poll_interval: Duration, max_poll_duration: Duration) -> Self {
        Self {
            poll_interval,
            max_poll_duration,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be greater than 0".into(),
            ));
        }
        if self.max_poll_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "max_poll_duration must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_poll_duration: Duration::from_secs(60),
        }
    }
}

/// Options fixed when an orchestrator is constructed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub resume: ResumeConfig,
    /// Log every fragment a fresh source yields.
    pub verbose_logging: bool,
}

/// Where fresh fragment sources come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Canned, deterministic replies. Used under test.
    Mock,
    /// Real upstream generator.
    #[default]
    Live,
}

impl FromStr for SourceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "test" => Ok(SourceMode::Mock),
            "live" => Ok(SourceMode::Live),
            other => Err(ConfigError::Invalid(format!(
                "RESUMABLE_SOURCE must be `mock` or `live`, got `{other}`"
            ))),
        }
    }
}

/// Process-level settings, usually read once from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub source_mode: SourceMode,
    /// Lifetime of a stream record before it becomes sweepable.
    pub stream_ttl: Duration,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            source_mode: SourceMode::default(),
            stream_ttl: DEFAULT_STREAM_TTL,
            database_url: None,
        }
    }
}

impl Settings {
    /// Loads `.env` (when present) and builds settings from the environment.
    ///
    /// Environment variables:
    /// - `RESUMABLE_POLL_INTERVAL_MS` (default 200)
    /// - `RESUMABLE_MAX_POLL_MS` (default 60000)
    /// - `RESUMABLE_STREAM_TTL_SECS` (default 86400)
    /// - `RESUMABLE_VERBOSE`: log every generated fragment (default off)
    /// - `RESUMABLE_SOURCE`: `mock` or `live` (default `live`)
    /// - `DATABASE_URL`, falling back to `POSTGRES_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = ResumeConfig::default();
        let resume = ResumeConfig {
            poll_interval: parse_millis(&lookup, "RESUMABLE_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            max_poll_duration: parse_millis(&lookup, "RESUMABLE_MAX_POLL_MS")?
                .unwrap_or(defaults.max_poll_duration),
        };
        resume.validate()?;

        let stream_ttl = match parse_number::<u64>(&lookup, "RESUMABLE_STREAM_TTL_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_STREAM_TTL,
        };
        let verbose_logging = match lookup("RESUMABLE_VERBOSE") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!("RESUMABLE_VERBOSE is not a boolean: `{raw}`"))
            })?,
            None => false,
        };
        let source_mode = match lookup("RESUMABLE_SOURCE") {
            Some(raw) => raw.parse()?,
            None => SourceMode::default(),
        };
        let database_url = lookup("DATABASE_URL")
            .or_else(|| lookup("POSTGRES_URL"))
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            orchestrator: OrchestratorConfig {
                resume,
                verbose_logging,
            },
            source_mode,
            stream_ttl,
            database_url,
        })
    }

    /// Returns the database URL or a `Missing` error naming the variable.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL (or POSTGRES_URL)".into()))
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key} is not a valid number: `{raw}`"))),
        None => Ok(None),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_number::<u64>(lookup, key)?.map(Duration::from_millis))
}
