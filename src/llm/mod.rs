//! LLM client layer
//!
//! Every agent session owns its own client, built from [`LlmSettings`] when
//! the session starts. There is no process-wide client that key or model
//! changes could mutate underneath a running session.
//!
//! Providers:
//! - `anthropic` - Anthropic Messages API (native tool_use blocks)
//! - `ollama` - Ollama `/api/chat` with tool calling
//! - `scripted` - canned responses for tests and dry runs

pub mod anthropic;
pub mod ollama;
pub mod scripted;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicClient;
pub use ollama::OllamaChatClient;
pub use scripted::{ScriptedClient, ScriptedFactory};
pub use types::{
    Block, ImageSource, LlmRequest, LlmResponse, Message, Role, StopReason, ToolDeclaration,
    ToolInvocation, Usage,
};

/// Error type for LLM calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Empty response from model")]
    EmptyResponse,
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),
    #[error("Scripted client has no responses left")]
    ScriptExhausted,
}

/// A model endpoint that accepts a conversation and returns the next turn
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, used for metrics labels and logs
    fn model(&self) -> &str;

    async fn send_message(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Builds a fresh client for each agent session
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Ollama,
}

/// Everything needed to construct a client for one session
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl LlmSettings {
    pub fn anthropic(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::Anthropic,
            model: model.into(),
            api_key: Some(api_key.into()),
            base_url: None,
            max_tokens: 8192,
        }
    }

    pub fn ollama(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: Provider::Ollama,
            model: model.into(),
            api_key: None,
            base_url: Some(base_url.into()),
            max_tokens: 8192,
        }
    }
}

impl ClientFactory for LlmSettings {
    fn create(&self) -> Result<Arc<dyn LlmClient>, LlmError> {
        match self.provider {
            Provider::Anthropic => {
                let key = self
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| LlmError::MissingApiKey("anthropic".to_string()))?;
                Ok(Arc::new(AnthropicClient::new(
                    key,
                    self.model.clone(),
                    self.base_url.clone(),
                    self.max_tokens,
                )))
            }
            Provider::Ollama => {
                let base_url = self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| ollama::DEFAULT_OLLAMA_URL.to_string());
                Ok(Arc::new(OllamaChatClient::new(base_url, self.model.clone())))
            }
        }
    }
}
