use anyhow::{bail, Context, Result};
use std::path::PathBuf;

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
/// Upper bound on a single model call. Past this the call fails as a transport error.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub llm: ExtractionClientConfig,
    pub port: u16,
    pub rust_log: String,
    pub max_upload_bytes: usize,
}

/// Everything the extraction client needs, passed explicitly to its constructor.
#[derive(Clone)]
pub struct ExtractionClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Extra PEM root certificate (e.g. a corporate TLS proxy). Adds trust; never disables checks.
    pub ca_bundle: Option<PathBuf>,
}

impl std::fmt::Debug for ExtractionClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("ca_bundle", &self.ca_bundle)
            .finish()
    }
}

impl ExtractionClientConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
            ca_bundle: None,
        }
    }

    /// Rejects plaintext endpoints other than loopback ones.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("LLM API key must not be empty");
        }
        if self.model.trim().is_empty() {
            bail!("LLM model must not be empty");
        }
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("LLM base URL '{}' is not a valid URL", self.base_url))?;
        match url.scheme() {
            "https" => Ok(()),
            "http" if is_loopback(url.host_str().unwrap_or_default()) => Ok(()),
            other => bail!(
                "LLM base URL must use https (got '{other}' for host '{}')",
                url.host_str().unwrap_or_default()
            ),
        }
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let mut llm = ExtractionClientConfig::new(
            require_env("LLM_API_KEY")?,
            optional_env("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        );
        llm.timeout_secs = parse_env("LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?;
        llm.ca_bundle = optional_env("LLM_CA_BUNDLE").map(PathBuf::from);
        llm.validate()?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            llm,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: '{raw}'")),
        None => Ok(default),
    }
}
