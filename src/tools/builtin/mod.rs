//! Built-in tools

pub mod delegate;
pub mod files;
pub mod project;
pub mod refine;
pub mod search;

use std::sync::Arc;

pub use delegate::{DelegateFileTool, DelegateStructureTool};
pub use files::{ListFilesTool, ReadFileTool, WriteFileTool};
pub use project::{slugify, DeploySiteTool, StartProjectTool};
pub use refine::RefineFileTool;
pub use search::WebSearchTool;

use super::ToolRegistry;

/// Registry holding every built-in tool; roles pick their subset
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WebSearchTool));
    registry.register(Arc::new(StartProjectTool));
    registry.register(Arc::new(DelegateStructureTool));
    registry.register(Arc::new(DeploySiteTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(DelegateFileTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(RefineFileTool));
    tracing::info!("Registered {} built-in tools", registry.len());
    registry
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::agent::AgentRole;
    use crate::search::SearchProvider;
    use crate::storage::MemoryStorage;
    use crate::tools::{BuildState, ToolContext, ToolServices, ENTRY_FILE};
    use crate::transport::RecordingSink;
    use crate::versioning::VersionStore;

    fn services(search: Option<Arc<dyn SearchProvider>>) -> Arc<ToolServices> {
        let storage = Arc::new(MemoryStorage::new());
        let versions = Arc::new(VersionStore::new(storage.clone(), None).with_live_file(ENTRY_FILE));
        Arc::new(ToolServices::new(storage, versions, search))
    }

    fn build(services: Arc<ToolServices>, state: BuildState) -> (ToolContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let ctx = ToolContext::new(
            "session-1",
            AgentRole::Planner,
            services,
            Arc::new(state),
            sink.clone(),
            CancellationToken::new(),
        );
        (ctx, sink)
    }

    /// Context with no project started
    pub async fn context() -> (ToolContext, Arc<RecordingSink>) {
        build(services(None), BuildState::new(Some("u1".into())))
    }

    pub async fn context_with_search(search: Arc<dyn SearchProvider>) -> (ToolContext, Arc<RecordingSink>) {
        build(services(Some(search)), BuildState::new(Some("u1".into())))
    }

    /// Context whose build already owns `slug`
    pub async fn context_with_project(slug: &str) -> (ToolContext, Arc<RecordingSink>) {
        let services = services(None);
        services
            .versions
            .create_project(slug, Some("u1"))
            .await
            .expect("create project");
        build(services, BuildState::for_project(slug, Some("u1".into())))
    }

    /// Context whose build names `slug` without the store knowing it
    pub async fn context_with_unknown_project(slug: &str) -> (ToolContext, Arc<RecordingSink>) {
        build(services(None), BuildState::for_project(slug, Some("u1".into())))
    }
}
