use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENV_FILE: &str = ".env";

/// Environment variable carrying the delivery credential. Opaque to the
/// engine; attached to webhook requests and never logged.
const AUTH_TOKEN_VAR: &str = "RELAY_AUTH_TOKEN";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Consecutive cycles with a permanent delivery failure before the
    /// destination is auto-unsubscribed.
    #[serde(default = "default_permanent_failure_threshold")]
    pub permanent_failure_threshold: u32,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_poll_interval() -> u64 { 5 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_concurrent_fetches() -> usize { 4 }
fn default_permanent_failure_threshold() -> u32 { 3 }
fn default_state_file() -> String { "subscriptions.json".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: default_poll_interval(),
            request_timeout_seconds: default_request_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            permanent_failure_threshold: default_permanent_failure_threshold(),
            state_file: default_state_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Entries are POSTed to `<base_url>/<destination_id>`.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Command prefix the external chat adapter listens for. Carried in
    /// config for the adapter's benefit; the engine never interprets it.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

fn default_command_prefix() -> String { "!tracker".to_string() }

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file if present, defaults otherwise. The admin CLI
    /// works without a config file; `run` mode still needs `[webhook]`.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.engine.poll_interval_minutes == 0 {
            anyhow::bail!("poll_interval_minutes must be > 0");
        }
        if self.engine.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be > 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.engine.poll_interval_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.request_timeout_seconds)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// Delivery credential from the environment (or .env), if configured.
    pub fn auth_token() -> Option<String> {
        match std::env::var(AUTH_TOKEN_VAR) {
            Ok(token) if !token.is_empty() => Some(sanitize_key(&token)),
            _ => None,
        }
    }
}

/// Strip carriage returns, BOM, and other invisible chars from a credential.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}
