//! Delegation tools: each call runs a nested agent session

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::AgentRole;
use crate::tools::{require_str, DelegationRequest, ToolContext, ToolError, ToolHandler};

async fn run_delegation(ctx: &ToolContext, role: AgentRole, task: String) -> Result<String, ToolError> {
    let delegator = ctx
        .delegator
        .as_ref()
        .ok_or_else(|| ToolError::Unavailable("delegation is not available in this session".to_string()))?;
    let summary = delegator.delegate(DelegationRequest { role, task }, ctx).await?;
    for path in &summary.files_written {
        ctx.record_write(path);
    }
    serde_json::to_string(&json!({
        "summary": summary.summary,
        "session_id": summary.session_id,
        "role": summary.role,
        "files_written": summary.files_written,
    }))
    .map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// Planner → Structurer
pub struct DelegateStructureTool;

#[async_trait]
impl ToolHandler for DelegateStructureTool {
    fn name(&self) -> &str {
        "delegate_structure"
    }

    fn description(&self) -> &str {
        "Hand the site plan to a structuring agent that decides the file layout and has every file written."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "The site plan: pages, sections, style, content"}
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let task = require_str(&input, "task")?;
        ctx.progress("Planning the site structure");
        run_delegation(
            ctx,
            AgentRole::Structurer,
            format!("Project slug: {}\n\n{}", slug, task),
        )
        .await
    }
}

/// Structurer → FileWriter, once per file
pub struct DelegateFileTool;

#[async_trait]
impl ToolHandler for DelegateFileTool {
    fn name(&self) -> &str {
        "delegate_file"
    }

    fn description(&self) -> &str {
        "Ask a file-writing agent to produce one file of the site."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to produce, relative to the project root"},
                "brief": {"type": "string", "description": "What the file must contain and how it relates to the others"}
            },
            "required": ["path", "brief"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let path = require_str(&input, "path")?;
        let brief = require_str(&input, "brief")?;
        ctx.progress(format!("Writing {}", path));
        run_delegation(
            ctx,
            AgentRole::FileWriter,
            format!(
                "Write the file `{}` for project `{}` using write_file.\n\n{}",
                path, slug, brief
            ),
        )
        .await
    }
}
