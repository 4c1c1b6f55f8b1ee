//! Project lifecycle tools: start_project, deploy_site

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::storage::project_path;
use crate::tools::{require_str, ToolContext, ToolError, ToolHandler, ENTRY_FILE};
use crate::transport::ProgressEvent;
use crate::versioning::VersionError;

const MAX_SLUG_LEN: usize = 48;

/// Lowercase ASCII words joined by `-`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.trim_end_matches('-').chars().take(MAX_SLUG_LEN).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "site".to_string()
    } else {
        slug
    }
}

/// Creates the project and claims a unique slug for this build
pub struct StartProjectTool;

#[async_trait]
impl ToolHandler for StartProjectTool {
    fn name(&self) -> &str {
        "start_project"
    }

    fn description(&self) -> &str {
        "Create the project for this website. Call once, before delegating the structure."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Human-readable site name, used to derive the slug"},
                "description": {"type": "string", "description": "One-line summary of the site"}
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        if let Some(existing) = ctx.build.slug() {
            return Err(ToolError::ProjectAlreadyStarted(existing));
        }
        let name = require_str(&input, "name")?;
        let base = slugify(name);
        let versions = &ctx.services.versions;

        let mut attempt = 1;
        let slug = loop {
            let candidate = if attempt == 1 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            match versions.create_project(&candidate, ctx.build.owner()).await {
                Ok(_) => break candidate,
                Err(VersionError::AlreadyExists(_)) => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        ctx.build.set_slug(&slug)?;
        info!(slug = %slug, session_id = %ctx.session_id, "Project started");
        ctx.sink.emit(ProgressEvent::ProjectStarted { slug: slug.clone() });
        Ok(format!("Project created with slug '{}'", slug))
    }
}

/// Publishes the project once its entry file exists
pub struct DeploySiteTool;

#[async_trait]
impl ToolHandler for DeploySiteTool {
    fn name(&self) -> &str {
        "deploy_site"
    }

    fn description(&self) -> &str {
        "Publish the website. Fails if index.html has not been written."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let slug = ctx.require_slug()?;
        let entry = project_path(&slug, ENTRY_FILE)?;
        if !ctx.services.storage.exists(&entry).await {
            return Err(ToolError::InvalidInput(format!(
                "{} has not been written yet; delegate the structure first",
                ENTRY_FILE
            )));
        }
        ctx.services.versions.mark_deployed(&slug).await?;
        ctx.build.mark_deployed();
        info!(slug = %slug, "Site deployed");
        ctx.progress(format!("Deploying {}", slug));
        Ok(format!("Site '{}' is deployed", slug))
    }
}
