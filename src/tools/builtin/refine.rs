//! refine_file: targeted patch edits to the entry file

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::refiner::PatchOperation;
use crate::tools::{ToolContext, ToolError, ToolHandler, ENTRY_FILE};

/// Applies structured patch operations to the project's index.html
pub struct RefineFileTool;

#[async_trait]
impl ToolHandler for RefineFileTool {
    fn name(&self) -> &str {
        "refine_file"
    }

    fn description(&self) -> &str {
        "Apply targeted edits to index.html. All operations apply together or not at all; \
         every selector must match exactly one element."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": ["add", "update", "remove", "style"]},
                            "selector": {"type": "string", "description": "CSS selector: tag, #id, .class, [attr], [attr=value], descendant or '>'"},
                            "position": {"type": "string", "enum": ["before", "after", "append", "prepend", "replace"]},
                            "content": {"type": "string"},
                            "attributes": {
                                "type": "object",
                                "description": "class: {add: [...], remove: [...]}; other keys set attributes, null removes"
                            }
                        },
                        "required": ["type", "selector"]
                    }
                }
            },
            "required": ["operations"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let operations: Vec<PatchOperation> = input
            .get("operations")
            .cloned()
            .map(serde_json::from_value::<Vec<PatchOperation>>)
            .transpose()
            .map_err(|e| ToolError::InvalidInput(format!("operations: {}", e)))?
            .ok_or_else(|| ToolError::InvalidInput("missing array field 'operations'".to_string()))?;

        let refinement = ctx.services.refine_entry(&slug, &operations).await?;
        ctx.note_version(&slug, refinement.version);
        ctx.record_write(ENTRY_FILE);
        info!(
            slug = %slug,
            from = refinement.from_version,
            to = refinement.version,
            operations = refinement.operations,
            "Refinement committed"
        );
        ctx.progress(format!("Updated {} (version {})", ENTRY_FILE, refinement.version));
        Ok(format!(
            "Applied {} operation(s); {} is now version {}",
            refinement.operations, ENTRY_FILE, refinement.version
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::test_support::context_with_project;

    #[tokio::test]
    async fn test_first_refinement_snapshots_base() {
        let (ctx, _sink) = context_with_project("bakery").await;
        // Live file written outside the version store
        ctx.services
            .storage
            .save_file("bakery/index.html", "<header class=\"static\"></header>")
            .await
            .unwrap();

        let out = RefineFileTool
            .execute(
                json!({"operations": [{"type": "style", "selector": "header",
                    "attributes": {"class": {"add": ["sticky"], "remove": ["static"]}}}]}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.contains("version 2"));

        let versions = &ctx.services.versions;
        assert_eq!(versions.content("bakery", 1).await.unwrap(), "<header class=\"static\"></header>");
        assert_eq!(
            ctx.services.storage.read_file("bakery/index.html").await.unwrap(),
            "<header class=\"sticky\"></header>"
        );
    }

    #[tokio::test]
    async fn test_rejected_patch_creates_no_version() {
        let (ctx, _sink) = context_with_project("bakery").await;
        ctx.services
            .write_project_file("bakery", "index.html", "<p>a</p><p>b</p>", None)
            .await
            .unwrap();

        let err = RefineFileTool
            .execute(json!({"operations": [{"type": "remove", "selector": "p"}]}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Patch(_)));
        assert_eq!(ctx.services.versions.versions("bakery").await.unwrap().len(), 1);
        assert_eq!(
            ctx.services.storage.read_file("bakery/index.html").await.unwrap(),
            "<p>a</p><p>b</p>"
        );
    }

    #[tokio::test]
    async fn test_malformed_operations() {
        let (ctx, _sink) = context_with_project("bakery").await;
        assert!(matches!(
            RefineFileTool.execute(json!({"operations": [{"type": "explode"}]}), &ctx).await,
            Err(ToolError::InvalidInput(_))
        ));
        assert!(matches!(
            RefineFileTool.execute(json!({}), &ctx).await,
            Err(ToolError::InvalidInput(_))
        ));
    }
}
