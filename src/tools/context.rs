//! State a tool handler can reach while it runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::ToolError;
use crate::agent::AgentRole;
use crate::llm::Usage;
use crate::refiner::{apply_patch, PatchOperation};
use crate::search::SearchProvider;
use crate::storage::{normalize_path, project_path, FileStorage};
use crate::transport::{ProgressEvent, ProgressSink};
use crate::versioning::VersionStore;

/// The project file tracked by the version store
pub const ENTRY_FILE: &str = "index.html";

/// Long-lived backends shared by every session
pub struct ToolServices {
    pub storage: Arc<dyn FileStorage>,
    pub versions: Arc<VersionStore>,
    pub search: Option<Arc<dyn SearchProvider>>,
}

/// Outcome of a structured refinement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refinement {
    pub from_version: u32,
    pub version: u32,
    pub operations: usize,
}

impl ToolServices {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        versions: Arc<VersionStore>,
        search: Option<Arc<dyn SearchProvider>>,
    ) -> Self {
        Self {
            storage,
            versions,
            search,
        }
    }

    /// Read a project file
    ///
    /// The entry file comes from the version store when the project has
    /// history, together with the version it belongs to.
    pub async fn read_project_file(
        &self,
        slug: &str,
        path: &str,
    ) -> Result<(String, Option<u32>), ToolError> {
        let full = project_path(slug, path)?;
        if full == project_path(slug, ENTRY_FILE)? {
            if let Some((version, content)) = self.versions.current_content(slug).await? {
                return Ok((content, Some(version)));
            }
        }
        Ok((self.storage.read_file(&full).await?, None))
    }

    /// Write a project file; the entry file becomes a new version
    ///
    /// `base` is the entry version the new content was derived from (`None`
    /// for a project without history). The write fails with a version
    /// conflict if the current version has moved past it. Version history
    /// is never writable. Returns the version number when the entry file
    /// was written.
    pub async fn write_project_file(
        &self,
        slug: &str,
        path: &str,
        content: &str,
        base: Option<u32>,
    ) -> Result<Option<u32>, ToolError> {
        let relative = normalize_path(path)?;
        if relative == "versions" || relative.starts_with("versions/") {
            return Err(ToolError::InvalidInput(format!(
                "{} is part of the version history and cannot be written",
                path
            )));
        }
        let full = project_path(slug, &relative)?;
        // Nothing is written for a project the store does not know
        self.versions.project(slug).await?;

        if relative == ENTRY_FILE {
            let version = self.versions.commit(slug, base, content).await?;
            // The store mirrors the live file only when configured to
            if self.versions.live_file() != Some(ENTRY_FILE) {
                self.storage.save_file(&full, content).await?;
            }
            return Ok(Some(version));
        }
        self.storage.save_file(&full, content).await?;
        self.versions.add_asset(slug, &relative).await?;
        Ok(None)
    }

    /// Patch the current entry document and commit it as a new version
    ///
    /// A project without history first gets its live file recorded as the
    /// base version, so undo always has a state to go back to. The commit
    /// fails with a version conflict if the current pointer moved while
    /// the patch was being applied.
    pub async fn refine_entry(
        &self,
        slug: &str,
        operations: &[PatchOperation],
    ) -> Result<Refinement, ToolError> {
        let (base_version, base) = match self.versions.current_content(slug).await? {
            Some(current) => current,
            None => {
                let live = self.storage.read_file(&project_path(slug, ENTRY_FILE)?).await?;
                let version = self.versions.snapshot(slug, &live).await?;
                (version, live)
            }
        };

        let updated = apply_patch(&base, operations)?;
        let version = self.versions.commit(slug, Some(base_version), &updated).await?;
        if self.versions.live_file() != Some(ENTRY_FILE) {
            self.storage
                .save_file(&project_path(slug, ENTRY_FILE)?, &updated)
                .await?;
        }
        Ok(Refinement {
            from_version: base_version,
            version,
            operations: operations.len(),
        })
    }
}

/// Per-request project state shared between a root session and its children
#[derive(Debug, Default)]
pub struct BuildState {
    owner: Option<String>,
    slug: Mutex<Option<String>>,
    deployed: AtomicBool,
}

impl BuildState {
    pub fn new(owner: Option<String>) -> Self {
        Self {
            owner,
            ..Default::default()
        }
    }

    /// State for a request that works on an existing project
    pub fn for_project(slug: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            owner,
            slug: Mutex::new(Some(slug.into())),
            deployed: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn slug(&self) -> Option<String> {
        self.slug.lock().ok().and_then(|s| s.clone())
    }

    /// Claim the slug for this request; only the first call succeeds
    pub fn set_slug(&self, slug: &str) -> Result<(), ToolError> {
        let mut current = self
            .slug
            .lock()
            .map_err(|_| ToolError::Unavailable("build state poisoned".to_string()))?;
        if let Some(existing) = current.as_ref() {
            return Err(ToolError::ProjectAlreadyStarted(existing.clone()));
        }
        *current = Some(slug.to_string());
        Ok(())
    }

    pub fn mark_deployed(&self) {
        self.deployed.store(true, Ordering::SeqCst);
    }

    /// Slug of a deployed project, if the request got that far
    pub fn deployed_slug(&self) -> Option<String> {
        if self.deployed.load(Ordering::SeqCst) {
            self.slug()
        } else {
            None
        }
    }
}

/// Sub-agent request issued by a delegation tool
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub role: AgentRole,
    pub task: String,
}

/// What a successful child session hands back to its parent
#[derive(Debug, Clone, Serialize)]
pub struct DelegationSummary {
    pub session_id: String,
    pub role: AgentRole,
    pub summary: String,
    pub files_written: Vec<String>,
    pub usage: Usage,
}

/// Runs nested agent sessions on behalf of a tool
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(
        &self,
        request: DelegationRequest,
        parent: &ToolContext,
    ) -> Result<DelegationSummary, ToolError>;
}

/// Everything a handler sees for one session
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub role: AgentRole,
    pub depth: usize,
    pub services: Arc<ToolServices>,
    pub build: Arc<BuildState>,
    pub sink: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
    pub delegator: Option<Arc<dyn Delegator>>,
    written: Arc<Mutex<Vec<String>>>,
    /// Entry version this session last read or wrote, per project
    seen: Arc<Mutex<HashMap<String, u32>>>,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        role: AgentRole,
        services: Arc<ToolServices>,
        build: Arc<BuildState>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            depth: 0,
            services,
            build,
            sink,
            cancel,
            delegator: None,
            written: Arc::new(Mutex::new(Vec::new())),
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_delegator(mut self, delegator: Arc<dyn Delegator>) -> Self {
        self.delegator = Some(delegator);
        self
    }

    /// Context for a delegated session: fresh file list and seen versions,
    /// child abort token
    pub fn child(&self, session_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            depth: self.depth + 1,
            services: self.services.clone(),
            build: self.build.clone(),
            sink: self.sink.clone(),
            cancel: self.cancel.child_token(),
            delegator: self.delegator.clone(),
            written: Arc::new(Mutex::new(Vec::new())),
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn require_slug(&self) -> Result<String, ToolError> {
        self.build.slug().ok_or(ToolError::NoProject)
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.sink.emit(ProgressEvent::progress(message));
    }

    pub fn record_write(&self, path: &str) {
        if let Ok(mut written) = self.written.lock() {
            if !written.iter().any(|p| p == path) {
                written.push(path.to_string());
            }
        }
    }

    pub fn note_version(&self, slug: &str, version: u32) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(slug.to_string(), version);
        }
    }

    /// Entry version this session's edits are based on
    pub fn seen_version(&self, slug: &str) -> Option<u32> {
        self.seen.lock().ok().and_then(|seen| seen.get(slug).copied())
    }

    /// Files written by this session's own tools
    pub fn files_written(&self) -> Vec<String> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}
