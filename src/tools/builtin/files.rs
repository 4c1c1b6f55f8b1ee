//! Project file tools: list_files, read_file, write_file

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::storage::StorageError;
use crate::tools::{require_str, ToolContext, ToolError, ToolHandler};
use crate::versioning::VersionError;

/// Files of the current project, relative to its root
pub struct ListFilesTool;

#[async_trait]
impl ToolHandler for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List every file of the current project (version history excluded)."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let prefix = format!("{}/", slug);
        let files: Vec<String> = ctx
            .services
            .storage
            .list_files(&slug)
            .await?
            .into_iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .filter(|p| !p.starts_with("versions/"))
            .collect();
        if files.is_empty() {
            return Ok("The project has no files yet.".to_string());
        }
        Ok(files.join("\n"))
    }
}

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file of the current project."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the project root, e.g. css/site.css"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let path = require_str(&input, "path")?;
        match ctx.services.read_project_file(&slug, path).await {
            Ok((content, version)) => {
                if let Some(v) = version {
                    ctx.note_version(&slug, v);
                }
                Ok(content)
            }
            Err(ToolError::Storage(StorageError::NotFound(_))) => Err(ToolError::InvalidInput(format!(
                "{} does not exist; use list_files to see what is there",
                path
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Writes a file; `index.html` is versioned
pub struct WriteFileTool;

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file of the current project with the complete content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the project root"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let path = require_str(&input, "path")?;
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing string field 'content'".to_string()))?;

        let base = ctx.seen_version(&slug);
        let version = match ctx.services.write_project_file(&slug, path, content, base).await {
            Ok(version) => version,
            Err(ToolError::Version(VersionError::Conflict { actual, .. })) => {
                return Err(ToolError::InvalidInput(format!(
                    "{} changed since this session last read it (now version {}); \
                     read_file it again and reapply your edits",
                    path,
                    actual.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
                )))
            }
            Err(e) => return Err(e),
        };
        if let Some(v) = version {
            ctx.note_version(&slug, v);
        }
        ctx.record_write(path);
        info!(slug = %slug, path, bytes = content.len(), ?version, "File written");
        ctx.progress(format!("Wrote {}", path));

        Ok(match version {
            Some(v) => format!("Wrote {} ({} bytes), saved as version {}", path, content.len(), v),
            None => format!("Wrote {} ({} bytes)", path, content.len()),
        })
    }
}
