use std::time::Duration;

use resumable_core::ConfigError;

/// Connection settings for the live upstream generator.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Event-stream endpoint that accepts a JSON POST.
    pub url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Whole-request timeout, stream included.
    pub timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Builds a config from `RESUMABLE_UPSTREAM_URL` and
    /// `RESUMABLE_UPSTREAM_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("RESUMABLE_UPSTREAM_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing("RESUMABLE_UPSTREAM_URL".into()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "RESUMABLE_UPSTREAM_URL must be an http(s) URL, got `{url}`"
            )));
        }
        let api_key = lookup("RESUMABLE_UPSTREAM_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(Self {
            api_key,
            ..Self::new(url)
        })
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn url_is_required() {
        let err = UpstreamConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("RESUMABLE_UPSTREAM_URL".into()));
    }

    #[test]
    fn reads_url_and_blank_key_as_none() {
        let config = UpstreamConfig::from_lookup(lookup(&[
            ("RESUMABLE_UPSTREAM_URL", "http://localhost:8080/stream"),
            ("RESUMABLE_UPSTREAM_API_KEY", "  "),
        ]))
        .unwrap();
        assert_eq!(config.url, "http://localhost:8080/stream");
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn rejects_non_http_url() {
        let err = UpstreamConfig::from_lookup(lookup(&[("RESUMABLE_UPSTREAM_URL", "ftp://x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
