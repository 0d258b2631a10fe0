use anyhow::{Context, Result};
use lookalike_core::inference::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use lookalike_core::resolver::{DEFAULT_IMAGE_BASE_URL, DEFAULT_LANGUAGE, DEFAULT_TMDB_BASE_URL};
use lookalike_core::{GeminiClient, StageDeadlines, TmdbResolver};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Optional TOML file layer. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub gemini_api_key: Option<String>,
    pub tmdb_token: Option<String>,
    pub gemini_model: Option<String>,
    pub language: Option<String>,
    pub analyze_timeout_secs: Option<u64>,
    pub resolve_timeout_secs: Option<u64>,
    pub gemini_base_url: Option<String>,
    pub tmdb_base_url: Option<String>,
    pub image_base_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Effective configuration: file values overlaid by `LOOKALIKE_*` environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Gemini API key.
    #[serde(serialize_with = "redact")]
    pub gemini_api_key: Option<String>,
    /// TMDB v4 read access token (sent as a bearer token).
    #[serde(serialize_with = "redact")]
    pub tmdb_token: Option<String>,
    pub gemini_model: String,
    /// Locale for person search results (default: ko-KR).
    pub language: String,
    pub analyze_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub gemini_base_url: String,
    pub tmdb_base_url: String,
    pub image_base_url: String,
}

impl Config {
    /// Load from an optional TOML file, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => FileConfig::load(p)?,
            None => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merge a file layer with an environment lookup; the environment wins.
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = StageDeadlines::default();
        let env_u64 = |key: &str| env(key).and_then(|v| v.trim().parse().ok());
        // A zero deadline would fail every request; treat it as unset.
        let nonzero = |secs: Option<u64>| secs.filter(|&s| s > 0);

        Self {
            gemini_api_key: env("LOOKALIKE_GEMINI_API_KEY").or(file.gemini_api_key),
            tmdb_token: env("LOOKALIKE_TMDB_TOKEN").or(file.tmdb_token),
            gemini_model: env("LOOKALIKE_GEMINI_MODEL")
                .or(file.gemini_model)
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            language: env("LOOKALIKE_LANGUAGE")
                .or(file.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            analyze_timeout_secs: nonzero(env_u64("LOOKALIKE_ANALYZE_TIMEOUT_SECS"))
                .or(nonzero(file.analyze_timeout_secs))
                .unwrap_or(defaults.analyze.as_secs()),
            resolve_timeout_secs: nonzero(env_u64("LOOKALIKE_RESOLVE_TIMEOUT_SECS"))
                .or(nonzero(file.resolve_timeout_secs))
                .unwrap_or(defaults.resolve.as_secs()),
            gemini_base_url: env("LOOKALIKE_GEMINI_BASE_URL")
                .or(file.gemini_base_url)
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            tmdb_base_url: env("LOOKALIKE_TMDB_BASE_URL")
                .or(file.tmdb_base_url)
                .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string()),
            image_base_url: env("LOOKALIKE_IMAGE_BASE_URL")
                .or(file.image_base_url)
                .unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string()),
        }
    }

    pub fn deadlines(&self) -> StageDeadlines {
        StageDeadlines {
            analyze: Duration::from_secs(self.analyze_timeout_secs),
            resolve: Duration::from_secs(self.resolve_timeout_secs),
        }
    }

    /// Build the inference client; fails if no API key is configured.
    pub fn gemini_client(&self) -> Result<GeminiClient> {
        let key = self
            .gemini_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("Gemini API key missing: set LOOKALIKE_GEMINI_API_KEY or gemini_api_key")?;
        Ok(GeminiClient::new(key)
            .with_model(&self.gemini_model)
            .with_base_url(&self.gemini_base_url))
    }

    /// Build the person-search client; fails if no token is configured.
    pub fn tmdb_resolver(&self) -> Result<TmdbResolver> {
        let token = self
            .tmdb_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("TMDB token missing: set LOOKALIKE_TMDB_TOKEN or tmdb_token")?;
        Ok(TmdbResolver::new(token)
            .with_base_url(&self.tmdb_base_url)
            .with_image_base_url(&self.image_base_url)
            .with_language(&self.language))
    }
}

fn redact<S: serde::Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => s.serialize_str("<redacted>"),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(FileConfig::default(), env(&[]));
        assert_eq!(config.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.language, "ko-KR");
        assert_eq!(config.image_base_url, "https://image.tmdb.org/t/p/w500");
        assert_eq!(config.deadlines(), StageDeadlines::default());
        assert!(config.gemini_client().is_err());
        assert!(config.tmdb_resolver().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            gemini_api_key = "from-file"
            tmdb_token = "file-token"
            language = "en-US"
            analyze_timeout_secs = 12
            "#,
        )
        .unwrap();
        let config = Config::from_sources(
            file,
            env(&[
                ("LOOKALIKE_GEMINI_API_KEY", "from-env"),
                ("LOOKALIKE_RESOLVE_TIMEOUT_SECS", "3"),
            ]),
        );

        assert_eq!(config.gemini_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.tmdb_token.as_deref(), Some("file-token"));
        assert_eq!(config.language, "en-US");
        assert_eq!(config.deadlines().analyze, Duration::from_secs(12));
        assert_eq!(config.deadlines().resolve, Duration::from_secs(3));
        assert!(config.gemini_client().is_ok());
        assert!(config.tmdb_resolver().is_ok());
    }

    #[test]
    fn test_unparsable_timeout_falls_back() {
        let config = Config::from_sources(
            FileConfig::default(),
            env(&[("LOOKALIKE_ANALYZE_TIMEOUT_SECS", "soon")]),
        );
        assert_eq!(config.deadlines().analyze, StageDeadlines::default().analyze);
    }

    #[test]
    fn test_zero_timeout_falls_back() {
        let file: FileConfig =
            toml::from_str("analyze_timeout_secs = 0\nresolve_timeout_secs = 7").unwrap();
        let config = Config::from_sources(file, env(&[("LOOKALIKE_RESOLVE_TIMEOUT_SECS", "0")]));
        assert_eq!(config.deadlines().analyze, StageDeadlines::default().analyze);
        // Zero in the environment does not mask the file value.
        assert_eq!(config.deadlines().resolve, Duration::from_secs(7));
    }

    #[test]
    fn test_empty_key_is_missing() {
        let config = Config::from_sources(
            FileConfig::default(),
            env(&[("LOOKALIKE_GEMINI_API_KEY", "")]),
        );
        assert!(config.gemini_client().is_err());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("gemini_key = \"x\"").is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookalike.toml");
        std::fs::write(&path, "gemini_model = \"gemini-2.0-flash\"\n").unwrap();
        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.gemini_model.as_deref(), Some("gemini-2.0-flash"));
        assert!(FileConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_secrets_redacted() {
        let config = Config::from_sources(
            FileConfig::default(),
            env(&[("LOOKALIKE_TMDB_TOKEN", "very-secret")]),
        );
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("very-secret"));
        assert!(json.contains("<redacted>"));
    }
}
