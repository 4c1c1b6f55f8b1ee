//! Ollama Chat API with tool calling support
//!
//! Ollama's `/api/chat` speaks a flat message format (`system`, `user`,
//! `assistant`, `tool` roles with string content). This client translates the
//! block-structured conversation into that format and back. Ollama does not
//! assign ids to tool calls, so ids are synthesised per response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Block, LlmRequest, LlmResponse, Message, Role, StopReason, ToolDeclaration, Usage};
use super::{LlmClient, LlmError};

/// Default local Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// A message in Ollama's chat format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct Tool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolFunction<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

/// Client for Ollama's /api/chat endpoint
pub struct OllamaChatClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// Flatten a block conversation into Ollama chat messages
fn to_chat_messages(system_prompt: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        out.push(ChatMessage::new("system", system_prompt));
    }

    for message in messages {
        match message.role {
            Role::Assistant => {
                let calls: Vec<ToolCall> = message
                    .tool_invocations()
                    .into_iter()
                    .map(|inv| ToolCall {
                        function: FunctionCall {
                            name: inv.name,
                            arguments: inv.input,
                        },
                    })
                    .collect();
                let mut chat = ChatMessage::new("assistant", message.text());
                if !calls.is_empty() {
                    chat.tool_calls = Some(calls);
                }
                out.push(chat);
            }
            Role::User => {
                let mut text = Vec::new();
                for block in &message.content {
                    match block {
                        Block::Text { text: t } => text.push(t.clone()),
                        Block::ToolResult { content, is_error, .. } => {
                            let body = content
                                .iter()
                                .filter_map(Block::as_text)
                                .collect::<Vec<_>>()
                                .join("\n");
                            let body = if *is_error { format!("Error: {}", body) } else { body };
                            out.push(ChatMessage::new("tool", body));
                        }
                        // Images are not forwarded to text-only chat models
                        Block::Image { .. } | Block::ToolUse { .. } => {}
                    }
                }
                if !text.is_empty() {
                    out.push(ChatMessage::new("user", text.join("\n")));
                }
            }
        }
    }
    out
}

#[async_trait]
impl LlmClient for OllamaChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let tools: Vec<Tool<'_>> = request.tools.iter().map(to_ollama_tool).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": to_chat_messages(&request.system_prompt, &request.messages),
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        Ok(into_response(chat_response))
    }
}

fn to_ollama_tool(decl: &ToolDeclaration) -> Tool<'_> {
    Tool {
        tool_type: "function",
        function: ToolFunction {
            name: &decl.name,
            description: &decl.description,
            parameters: &decl.input_schema,
        },
    }
}

fn into_response(chat: ChatResponse) -> LlmResponse {
    // Native tool_calls first; some models emit the call as JSON in the text
    let native = chat.message.tool_calls.clone().filter(|tc| !tc.is_empty());
    let (calls, text) = match native {
        Some(calls) => (calls, chat.message.content.clone()),
        None => {
            let parsed = parse_tool_calls_from_text(&chat.message.content);
            if parsed.is_empty() {
                (parsed, chat.message.content.clone())
            } else {
                (parsed, String::new())
            }
        }
    };

    let mut content = Vec::new();
    if !text.trim().is_empty() {
        content.push(Block::text(text));
    }
    let has_calls = !calls.is_empty();
    for call in calls {
        content.push(Block::ToolUse {
            id: format!("call_{}", uuid::Uuid::now_v7().simple()),
            name: call.function.name,
            input: call.function.arguments,
        });
    }

    LlmResponse {
        role: Role::Assistant,
        content,
        stop_reason: if has_calls {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        },
        usage: Usage {
            input_tokens: chat.prompt_eval_count,
            output_tokens: chat.eval_count,
        },
    }
}

/// Try to parse tool calls embedded as JSON objects in the response text
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();
    if let Some(call) = parse_tool_call(content) {
        return vec![call];
    }

    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(call) = start.and_then(|s| parse_tool_call(&content[s..=i])) {
                        calls.push(call);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }
    calls
}

fn parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let name = value.get("name").and_then(|n| n.as_str())?;
    // Some models use "parameters" instead of "arguments"
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();
    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}
