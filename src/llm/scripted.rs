//! Scripted client returning canned responses in order
//!
//! Exercises the orchestration without a model. All clients created by one
//! [`ScriptedFactory`] pop from the same queue, which matches the sequential
//! way nested sessions consume turns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::types::{LlmRequest, LlmResponse};
use super::{ClientFactory, LlmClient, LlmError};

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<LlmResponse, LlmError>>,
    requests: Vec<LlmRequest>,
}

/// Client that replays a fixed list of responses
#[derive(Clone, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<Script>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                responses: responses.into(),
                requests: Vec::new(),
            })),
        }
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.script
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.responses.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn send_message(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| LlmError::ScriptExhausted)?;
        script.requests.push(request.clone());
        script
            .responses
            .pop_front()
            .unwrap_or(Err(LlmError::ScriptExhausted))
    }
}

/// Factory handing out clients that share one script
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    client: ScriptedClient,
}

impl ScriptedFactory {
    pub fn new(client: ScriptedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ScriptedClient {
        &self.client
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::new(self.client.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let client = ScriptedClient::new(vec![LlmResponse::text("one"), LlmResponse::text("two")]);
        let request = LlmRequest {
            system_prompt: String::new(),
            tools: vec![],
            messages: vec![],
        };
        assert_eq!(client.send_message(&request).await.unwrap().text_content(), "one");
        assert_eq!(client.send_message(&request).await.unwrap().text_content(), "two");
        assert!(matches!(
            client.send_message(&request).await,
            Err(LlmError::ScriptExhausted)
        ));
        assert_eq!(client.requests().len(), 3);
    }
}
