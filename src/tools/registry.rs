//! Tool registry and dispatcher

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span, warn, Instrument};

use super::{ToolContext, ToolError, ToolHandler};
use crate::llm::{Block, ToolDeclaration, ToolInvocation};
use crate::metrics::{TOOL_CALLS, TOOL_CALL_DURATION};

/// Result of dispatching one invocation
#[derive(Debug)]
pub struct DispatchResult {
    /// `tool_result` blocks for the invocation; empty when no handler exists
    pub blocks: Vec<Block>,
    /// The handler's error, already folded into `blocks`
    pub error: Option<ToolError>,
}

impl DispatchResult {
    pub fn is_unhandled(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Registry of available tools, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name.clone());
        }
        debug!("Registered tool: {}", name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A registry holding only `names` (those that exist here)
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        let mut scoped = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(*name) {
                scoped.register(tool.clone());
            }
        }
        scoped
    }

    /// Declarations advertised to the model
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.declaration())
            .collect()
    }

    /// Run the handler for `invocation`
    ///
    /// Handler errors become an `is_error` tool_result; an unknown name
    /// yields no blocks at all.
    pub async fn dispatch(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> DispatchResult {
        let Some(tool) = self.tools.get(&invocation.name) else {
            warn!(tool = %invocation.name, session_id = %ctx.session_id, "No handler for tool");
            TOOL_CALLS.with_label_values(&["unknown", "unknown"]).inc();
            return DispatchResult {
                blocks: Vec::new(),
                error: None,
            };
        };

        let span = info_span!(
            "tool_call",
            tool = %invocation.name,
            tool_use_id = %invocation.id,
            session_id = %ctx.session_id,
            otel.name = "tool_call"
        );
        let start = Instant::now();
        let result = tool
            .execute(invocation.input.clone(), ctx)
            .instrument(span)
            .await;
        TOOL_CALL_DURATION
            .with_label_values(&[&invocation.name])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(text) => {
                TOOL_CALLS.with_label_values(&[&invocation.name, "ok"]).inc();
                DispatchResult {
                    blocks: vec![Block::tool_result(&invocation.id, text)],
                    error: None,
                }
            }
            Err(e) => {
                TOOL_CALLS.with_label_values(&[&invocation.name, "error"]).inc();
                warn!(tool = %invocation.name, session_id = %ctx.session_id, error = %e, "Tool failed");
                DispatchResult {
                    blocks: vec![Block::tool_error(&invocation.id, e.to_string())],
                    error: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::storage::MemoryStorage;
    use crate::tools::{BuildState, ToolServices};
    use crate::transport::RecordingSink;
    use crate::versioning::VersionStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
            match input.get("fail") {
                Some(_) => Err(ToolError::InvalidInput("asked to fail".into())),
                None => Ok(input.to_string()),
            }
        }
    }

    fn ctx() -> ToolContext {
        let storage = Arc::new(MemoryStorage::new());
        let versions = Arc::new(VersionStore::new(storage.clone(), None));
        ToolContext::new(
            "s1",
            AgentRole::Planner,
            Arc::new(ToolServices::new(storage, versions, None)),
            Arc::new(BuildState::new(None)),
            Arc::new(RecordingSink::new()),
            CancellationToken::new(),
        )
    }

    fn invocation(name: &str, input: Value) -> ToolInvocation {
        ToolInvocation {
            id: "tu_1".into(),
            name: name.into(),
            input,
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.dispatch(&invocation("echo", json!({"a": 1})), &ctx()).await;
        assert!(result.error.is_none());
        assert_eq!(result.blocks, vec![Block::tool_result("tu_1", "{\"a\":1}")]);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.dispatch(&invocation("echo", json!({"fail": true})), &ctx()).await;
        assert!(matches!(result.error, Some(ToolError::InvalidInput(_))));
        let Block::ToolResult { is_error, tool_use_id, .. } = &result.blocks[0] else {
            panic!("expected tool_result");
        };
        assert!(is_error);
        assert_eq!(tool_use_id, "tu_1");
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_nothing() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch(&invocation("unknown_tool", json!({})), &ctx()).await;
        assert!(result.is_unhandled());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_subset_and_declarations() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.subset(&["echo", "missing"]).len(), 1);
        assert!(registry.subset(&["missing"]).is_empty());
        let decls = registry.declarations();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "echo");
    }
}
