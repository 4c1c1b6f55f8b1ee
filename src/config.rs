//! Application configuration
//!
//! Defaults, then an optional TOML file, then `SITECRAFT_*` environment
//! variables. API keys never live in the file: the file names the
//! environment variable that holds them.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//!
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-5"
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [versions]
//! retention_cap = 10
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, DelegationPolicy};
use crate::llm::{LlmSettings, Provider};
use crate::search::DEFAULT_SEARCH_URL;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub agent: AgentSection,
    pub versions: VersionsConfig,
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub quota: QuotaConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Control messages a room may burst
    pub rate_limit_burst: u64,
    /// Sustained control messages per second per room
    pub rate_limit_per_sec: f64,
    /// Seconds an unused room bucket is kept before it is dropped
    pub rate_limit_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            rate_limit_burst: 20,
            rate_limit_per_sec: 5.0,
            rate_limit_idle_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
        }
    }
}

impl LlmConfig {
    /// Client settings with the key resolved through `env`
    pub fn settings(&self, env: impl Fn(&str) -> Option<String>) -> LlmSettings {
        LlmSettings {
            provider: self.provider,
            model: self.model.clone(),
            api_key: env(&self.api_key_env),
            base_url: self.base_url.clone(),
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub llm_timeout_secs: u64,
    pub delegation_timeout_secs: u64,
    pub delegation_policy: DelegationPolicy,
    /// Where finished session transcripts are written; unset disables them
    pub transcripts_dir: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            llm_timeout_secs: 120,
            delegation_timeout_secs: 600,
            delegation_policy: DelegationPolicy::Fatal,
            transcripts_dir: None,
        }
    }
}

impl AgentSection {
    pub fn runtime_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.max_iterations,
            llm_timeout: Duration::from_secs(self.llm_timeout_secs),
            delegation_timeout: Duration::from_secs(self.delegation_timeout_secs),
            delegation_policy: self.delegation_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionsConfig {
    /// Versions kept per project; unset keeps everything
    pub retention_cap: Option<usize>,
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            retention_cap: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./sites"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_URL.to_string(),
            api_key_env: "BRAVE_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Credits granted to a user seen for the first time; unset rejects unknown users
    pub default_credits: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_credits: Some(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub log_format: LogFormat,
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "sitecraft".to_string(),
            filter: "info,sitecraft=debug".to_string(),
            log_format: LogFormat::Plain,
            otlp_endpoint: None,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })
}

impl AppConfig {
    /// Defaults, the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `SITECRAFT_*` overrides read through `env`
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env("SITECRAFT_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("SITECRAFT_LLM_PROVIDER") {
            self.llm.provider = match v.to_ascii_lowercase().as_str() {
                "anthropic" => Provider::Anthropic,
                "ollama" => Provider::Ollama,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "SITECRAFT_LLM_PROVIDER".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = env("SITECRAFT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("SITECRAFT_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = env("SITECRAFT_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("SITECRAFT_MAX_ITERATIONS", v)?;
        }
        if let Some(v) = env("SITECRAFT_TRANSCRIPTS_DIR") {
            self.agent.transcripts_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("SITECRAFT_RETENTION_CAP") {
            self.versions.retention_cap = Some(parse_env("SITECRAFT_RETENTION_CAP", v)?);
        }
        if let Some(v) = env("SITECRAFT_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = env("SITECRAFT_DEFAULT_CREDITS") {
            self.quota.default_credits = Some(parse_env("SITECRAFT_DEFAULT_CREDITS", v)?);
        }
        if let Some(v) = env("SITECRAFT_LOG_FORMAT") {
            self.telemetry.log_format = parse_env("SITECRAFT_LOG_FORMAT", v)?;
        }
        if let Some(v) = env("SITECRAFT_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(v);
        }
        Ok(())
    }
}
