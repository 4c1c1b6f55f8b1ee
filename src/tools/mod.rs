//! Tools the agents can call
//!
//! Every tool implements [`ToolHandler`]; the [`ToolRegistry`] resolves the
//! name in a `tool_use` block and turns the handler's result (or error) into
//! a single `tool_result` block.

pub mod builtin;
pub mod context;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolDeclaration;
use crate::refiner::PatchError;
use crate::search::SearchError;
use crate::storage::StorageError;
use crate::versioning::VersionError;

pub use context::{
    BuildState, DelegationRequest, DelegationSummary, Delegator, ToolContext, ToolServices,
    ENTRY_FILE,
};
pub use registry::{DispatchResult, ToolRegistry};

/// Error raised by a tool handler; the model sees its text
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No project has been started yet; call start_project first")]
    NoProject,
    #[error("Project already started: {0}")]
    ProjectAlreadyStarted(String),
    #[error("Not available: {0}")]
    Unavailable(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Version error: {0}")]
    Version(#[from] VersionError),
    #[error("Patch rejected: {0}")]
    Patch(#[from] PatchError),
    #[error("Search failed: {0}")]
    Search(#[from] SearchError),
    #[error("Delegated {role} session failed: {reason}")]
    Delegation { role: String, reason: String },
}

impl ToolError {
    pub fn is_delegation(&self) -> bool {
        matches!(self, ToolError::Delegation { .. })
    }
}

/// A named capability exposed to the model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `input` object
    fn input_schema(&self) -> Value;

    /// Run the tool; the returned text becomes the `tool_result` content
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Required string field of a tool input
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string field '{}'", field)))
}
