//! Anthropic Messages API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Block, LlmRequest, LlmResponse, Message, Role, StopReason, ToolDeclaration, Usage};
use super::{LlmClient, LlmError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client bound to one API key and model
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDeclaration],
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default = "assistant_role")]
    role: Role,
    content: Vec<Block>,
    stop_reason: Option<StopReason>,
    #[serde(default)]
    usage: Usage,
}

fn assistant_role() -> Role {
    Role::Assistant
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let endpoint = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &request.system_prompt,
            messages: &request.messages,
            tools: &request.tools,
        };

        let response = self
            .client
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let has_tool_use = parsed
            .content
            .iter()
            .any(|b| matches!(b, Block::ToolUse { .. }));
        let stop_reason = parsed.stop_reason.unwrap_or(if has_tool_use {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        });

        Ok(LlmResponse {
            role: parsed.role,
            content: parsed.content,
            stop_reason,
            usage: parsed.usage,
        })
    }
}
