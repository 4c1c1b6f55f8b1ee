//! Studio: turns room control messages into builds, refinements and history moves
//!
//! ```text
//! startProject ─▶ claim room ─▶ decrement credit ─▶ spawn Planner session ─▶ release room
//!                     │                │
//!                     └─busy: error    └─insufficient: error, room released
//! abortProjectCreation ─▶ cancel the room's active session tree
//! refineProject ─▶ operations: apply + commit now
//!               └▶ instructions: spawn Refiner session
//! undo/redoCodeChange ─▶ move the current-version pointer ─▶ undoResult / redoResult
//! ```
//!
//! A room runs at most one agent session tree at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentRole, AgentRuntime};
use crate::llm::Block;
use crate::metrics::{BUILDS, BUILD_DURATION, CONTROL_MESSAGES, QUOTA_REJECTIONS};
use crate::quota::{QuotaError, QuotaLedger};
use crate::refiner::PatchOperation;
use crate::tools::{BuildState, ToolContext, ToolError, ToolServices};
use crate::transport::{ControlMessage, HistoryOutcome, ImageInput, ProgressEvent, ProgressSink};
use crate::versioning::{HistoryStep, VersionError};

#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("A build is already running in this room")]
    BuildInProgress,
    #[error("Request text is empty")]
    EmptyPrompt,
    #[error("No project selected for this room")]
    NoProject,
    #[error("Project not found: {0}")]
    UnknownProject(String),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Version(#[from] VersionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryDirection {
    Undo,
    Redo,
}

struct ActiveBuild {
    id: u64,
    cancel: CancellationToken,
    /// Every client left the room while the build ran
    vacated: bool,
}

pub struct Studio {
    runtime: Arc<AgentRuntime>,
    services: Arc<ToolServices>,
    quota: Arc<dyn QuotaLedger>,
    builds: Mutex<HashMap<String, ActiveBuild>>,
    /// Room → most recent project, the default target of undo/redo/refine
    last_slug: Mutex<HashMap<String, String>>,
    next_build: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Studio {
    pub fn new(runtime: Arc<AgentRuntime>, services: Arc<ToolServices>, quota: Arc<dyn QuotaLedger>) -> Self {
        Self {
            runtime,
            services,
            quota,
            builds: Mutex::new(HashMap::new()),
            last_slug: Mutex::new(HashMap::new()),
            next_build: AtomicU64::new(1),
        }
    }

    pub fn services(&self) -> &Arc<ToolServices> {
        &self.services
    }

    pub fn active_builds(&self) -> usize {
        locked(&self.builds).len()
    }

    pub fn is_busy(&self, room: &str) -> bool {
        locked(&self.builds).contains_key(room)
    }

    pub fn last_slug(&self, room: &str) -> Option<String> {
        locked(&self.last_slug).get(room).cloned()
    }

    pub fn remember_slug(&self, room: &str, slug: impl Into<String>) {
        locked(&self.last_slug).insert(room.to_string(), slug.into());
    }

    /// Handle one control message
    ///
    /// Returns the handle of the spawned session, if one was started. Errors
    /// are reported to `sink` as `error` events.
    pub async fn handle(
        self: &Arc<Self>,
        room: &str,
        message: ControlMessage,
        sink: Arc<dyn ProgressSink>,
    ) -> Option<JoinHandle<()>> {
        CONTROL_MESSAGES.with_label_values(&[message.name()]).inc();
        let result = match message {
            ControlMessage::StartProject { user_id, prompt, images } => self
                .start_project(room, &user_id, &prompt, &images, sink.clone())
                .await
                .map(Some),
            ControlMessage::AbortProjectCreation => {
                if !self.abort(room) {
                    sink.emit(ProgressEvent::progress("Nothing to abort"));
                }
                Ok(None)
            }
            ControlMessage::UndoCodeChange { slug } => {
                let outcome = self.history(room, slug, HistoryDirection::Undo).await;
                sink.emit(ProgressEvent::UndoResult(outcome));
                Ok(None)
            }
            ControlMessage::RedoCodeChange { slug } => {
                let outcome = self.history(room, slug, HistoryDirection::Redo).await;
                sink.emit(ProgressEvent::RedoResult(outcome));
                Ok(None)
            }
            ControlMessage::RefineProject {
                slug,
                user_id,
                instructions,
                operations,
            } => {
                self.refine(room, slug, user_id, instructions, operations, sink.clone())
                    .await
            }
        };

        match result {
            Ok(handle) => handle,
            Err(e) => {
                warn!(room, error = %e, "Request rejected");
                sink.emit(ProgressEvent::error(e.to_string()));
                None
            }
        }
    }

    fn claim_room(&self, room: &str) -> Result<(u64, CancellationToken), StudioError> {
        let mut builds = locked(&self.builds);
        if builds.contains_key(room) {
            return Err(StudioError::BuildInProgress);
        }
        let id = self.next_build.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        builds.insert(
            room.to_string(),
            ActiveBuild {
                id,
                cancel: cancel.clone(),
                vacated: false,
            },
        );
        Ok((id, cancel))
    }

    fn release_room(&self, room: &str, id: u64) {
        self.finish_build(room, id, None);
    }

    /// Free the room and remember the build's project unless the room emptied meanwhile
    fn finish_build(&self, room: &str, id: u64, slug: Option<String>) {
        let mut builds = locked(&self.builds);
        let vacated = match builds.get(room) {
            Some(build) if build.id == id => builds.remove(room).map(|b| b.vacated).unwrap_or(false),
            _ => false,
        };
        if let Some(slug) = slug.filter(|_| !vacated) {
            locked(&self.last_slug).insert(room.to_string(), slug);
        }
    }

    /// A client joined `room`
    pub fn room_joined(&self, room: &str) {
        if let Some(build) = locked(&self.builds).get_mut(room) {
            build.vacated = false;
        }
    }

    /// The last client left `room`; drop its per-room state
    ///
    /// A build still running keeps going but will not re-register the room.
    pub fn forget_room(&self, room: &str) {
        let mut builds = locked(&self.builds);
        if let Some(build) = builds.get_mut(room) {
            build.vacated = true;
        }
        locked(&self.last_slug).remove(room);
    }

    /// Start a build in `room`; one credit is consumed
    pub async fn start_project(
        self: &Arc<Self>,
        room: &str,
        user_id: &str,
        prompt: &str,
        images: &[ImageInput],
        sink: Arc<dyn ProgressSink>,
    ) -> Result<JoinHandle<()>, StudioError> {
        if prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        let (build_id, cancel) = self.claim_room(room)?;
        if let Err(e) = self.quota.decrement_credits(user_id).await {
            self.release_room(room, build_id);
            QUOTA_REJECTIONS.inc();
            BUILDS.with_label_values(&["rejected"]).inc();
            return Err(e.into());
        }

        let mut prompt_blocks = vec![Block::text(prompt)];
        prompt_blocks.extend(images.iter().map(|i| Block::image(&i.media_type, &i.data)));

        let build = Arc::new(BuildState::new(Some(user_id.to_string())));
        let ctx = ToolContext::new(
            AgentRuntime::new_session_id(),
            AgentRole::Planner,
            self.services.clone(),
            build.clone(),
            sink.clone(),
            cancel,
        );
        info!(room, user_id, session_id = %ctx.session_id, "Build started");
        sink.emit(ProgressEvent::progress("Build started"));

        let studio = self.clone();
        let room = room.to_string();
        let user_id = user_id.to_string();
        Ok(tokio::spawn(async move {
            let started = Instant::now();
            let report = studio.runtime.run_root(ctx, prompt_blocks).await;
            BUILD_DURATION.observe(started.elapsed().as_secs_f64());

            let outcome = if build.deployed_slug().is_some() {
                "deployed"
            } else {
                report.outcome.label()
            };
            BUILDS.with_label_values(&[outcome]).inc();
            // No model turn was spent
            if report.iterations == 0 {
                if let Err(e) = studio.quota.refund_credit(&user_id).await {
                    warn!(user_id = %user_id, error = %e, "Credit refund failed");
                }
            }
            studio.finish_build(&room, build_id, build.slug());
            info!(
                room = %room,
                outcome,
                iterations = report.iterations,
                tokens = report.usage.total(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Build finished"
            );
        }))
    }

    /// Cancel the room's active session tree
    pub fn abort(&self, room: &str) -> bool {
        match locked(&self.builds).get(room) {
            Some(build) => {
                info!(room, "Abort requested");
                build.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn resolve_slug(&self, room: &str, slug: Option<String>) -> Result<String, StudioError> {
        slug.filter(|s| !s.is_empty())
            .or_else(|| self.last_slug(room))
            .ok_or(StudioError::NoProject)
    }

    /// Refine a project, directly from operations or through a Refiner session
    pub async fn refine(
        self: &Arc<Self>,
        room: &str,
        slug: Option<String>,
        user_id: Option<String>,
        instructions: Option<String>,
        operations: Option<Vec<PatchOperation>>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Option<JoinHandle<()>>, StudioError> {
        let slug = self.resolve_slug(room, slug)?;
        if !self.services.versions.exists(&slug).await? {
            return Err(StudioError::UnknownProject(slug));
        }
        self.remember_slug(room, slug.clone());

        if let Some(operations) = operations.filter(|ops| !ops.is_empty()) {
            let refinement = self.services.refine_entry(&slug, &operations).await?;
            sink.emit(ProgressEvent::Completed {
                message: format!(
                    "Applied {} operation(s); {} is now at version {}",
                    refinement.operations, slug, refinement.version
                ),
            });
            return Ok(None);
        }

        let instructions = instructions
            .filter(|i| !i.trim().is_empty())
            .ok_or(StudioError::EmptyPrompt)?;
        let (build_id, cancel) = self.claim_room(room)?;
        let ctx = ToolContext::new(
            AgentRuntime::new_session_id(),
            AgentRole::Refiner,
            self.services.clone(),
            Arc::new(BuildState::for_project(slug.clone(), user_id)),
            sink,
            cancel,
        );
        info!(room, slug = %slug, session_id = %ctx.session_id, "Refinement started");

        let studio = self.clone();
        let room = room.to_string();
        let prompt = format!("Project slug: {}\n\n{}", slug, instructions);
        Ok(Some(tokio::spawn(async move {
            let report = studio.runtime.run_root(ctx, vec![Block::text(prompt)]).await;
            studio.release_room(&room, build_id);
            info!(room = %room, outcome = report.outcome.label(), "Refinement finished");
        })))
    }

    async fn history(&self, room: &str, slug: Option<String>, direction: HistoryDirection) -> HistoryOutcome {
        let slug = match self.resolve_slug(room, slug) {
            Ok(slug) => slug,
            Err(e) => {
                return HistoryOutcome {
                    success: false,
                    message: e.to_string(),
                    code: None,
                }
            }
        };
        let versions = &self.services.versions;
        let step = match direction {
            HistoryDirection::Undo => versions.undo(&slug).await,
            HistoryDirection::Redo => versions.redo(&slug).await,
        };
        match step {
            Ok(HistoryStep::Restored { version, content }) => HistoryOutcome {
                success: true,
                message: format!("Restored version {}", version),
                code: Some(content),
            },
            Ok(HistoryStep::Nothing) => HistoryOutcome {
                success: false,
                message: match direction {
                    HistoryDirection::Undo => "Nothing to undo".to_string(),
                    HistoryDirection::Redo => "Nothing to redo".to_string(),
                },
                code: None,
            },
            Err(e) => HistoryOutcome {
                success: false,
                message: e.to_string(),
                code: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::llm::{LlmResponse, ScriptedClient, ScriptedFactory};
    use crate::quota::InMemoryQuota;
    use crate::storage::{FileStorage, MemoryStorage};
    use crate::tools::builtin::builtin_registry;
    use crate::tools::ENTRY_FILE;
    use crate::transport::RecordingSink;
    use crate::versioning::VersionStore;
    use serde_json::json;

    fn studio(responses: Vec<LlmResponse>, credits: u64) -> (Arc<Studio>, ScriptedClient, Arc<InMemoryQuota>) {
        let client = ScriptedClient::new(responses);
        let runtime = Arc::new(AgentRuntime::new(
            Arc::new(ScriptedFactory::new(client.clone())),
            builtin_registry(),
            AgentConfig::default(),
        ));
        let storage = Arc::new(MemoryStorage::new());
        let versions = Arc::new(VersionStore::new(storage.clone(), Some(10)).with_live_file(ENTRY_FILE));
        let services = Arc::new(ToolServices::new(storage, versions, None));
        let quota = Arc::new(InMemoryQuota::new(Some(credits)));
        (Arc::new(Studio::new(runtime, services, quota.clone())), client, quota)
    }

    fn start(prompt: &str) -> ControlMessage {
        ControlMessage::StartProject {
            user_id: "u1".into(),
            prompt: prompt.into(),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn test_quota_exhausted_rejects_before_any_session() {
        let (studio, client, _) = studio(vec![LlmResponse::text("unused")], 0);
        let sink = Arc::new(RecordingSink::new());
        let handle = studio.handle("room", start("A bakery"), sink.clone()).await;

        assert!(handle.is_none());
        assert!(client.requests().is_empty());
        assert!(!studio.is_busy("room"));
        let [ProgressEvent::Error { error }] = &sink.events()[..] else {
            panic!("expected a single error event");
        };
        assert!(error.contains("Insufficient credits"));
    }

    #[tokio::test]
    async fn test_second_start_in_busy_room_is_rejected() {
        let (studio, _client, quota) = studio(vec![], 5);
        let (id, _cancel) = studio.claim_room("room").unwrap();
        let sink = Arc::new(RecordingSink::new());

        assert!(studio.handle("room", start("Another"), sink.clone()).await.is_none());
        assert!(matches!(sink.events()[..], [ProgressEvent::Error { .. }]));
        // Rejected before the credit was taken
        assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 5);

        studio.release_room("room", id);
        assert!(!studio.is_busy("room"));
    }

    #[tokio::test]
    async fn test_emptied_room_forgets_its_project() {
        let (studio, _client, _) = studio(vec![], 1);
        studio.remember_slug("room", "site");
        studio.remember_slug("other", "cafe");

        studio.forget_room("room");
        assert_eq!(studio.last_slug("room"), None);
        assert_eq!(studio.last_slug("other").as_deref(), Some("cafe"));

        // Build finishing after everyone left does not bring the room back
        let (id, _cancel) = studio.claim_room("room").unwrap();
        studio.forget_room("room");
        studio.finish_build("room", id, Some("site".into()));
        assert_eq!(studio.last_slug("room"), None);
        assert!(!studio.is_busy("room"));

        // Unless a client came back before it finished
        let (id, _cancel) = studio.claim_room("room").unwrap();
        studio.forget_room("room");
        studio.room_joined("room");
        studio.finish_build("room", id, Some("site".into()));
        assert_eq!(studio.last_slug("room").as_deref(), Some("site"));
    }

    #[tokio::test]
    async fn test_completed_build_releases_room_and_remembers_slug() {
        let (studio, _client, quota) = studio(
            vec![
                LlmResponse::tool_calls(vec![("p1", "start_project", json!({"name": "Tea House"}))]),
                LlmResponse::text("Started"),
            ],
            3,
        );
        let sink = Arc::new(RecordingSink::new());
        let handle = studio.handle("room", start("Tea house"), sink.clone()).await.unwrap();
        handle.await.unwrap();

        assert!(!studio.is_busy("room"));
        assert_eq!(studio.last_slug("room").as_deref(), Some("tea-house"));
        assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 2);
        assert!(matches!(sink.terminal_events()[..], [ProgressEvent::Completed { .. }]));
        assert!(sink
            .events()
            .contains(&ProgressEvent::ProjectStarted { slug: "tea-house".into() }));
    }

    #[tokio::test]
    async fn test_abort_without_build() {
        let (studio, _client, _) = studio(vec![], 1);
        let sink = Arc::new(RecordingSink::new());
        studio.handle("room", ControlMessage::AbortProjectCreation, sink.clone()).await;
        assert_eq!(sink.events(), vec![ProgressEvent::progress("Nothing to abort")]);
    }

    #[tokio::test]
    async fn test_undo_redo_results() {
        let (studio, _client, _) = studio(vec![], 1);
        let versions = &studio.services().versions;
        versions.create_project("site", None).await.unwrap();
        versions.snapshot("site", "<p>1</p>").await.unwrap();
        versions.snapshot("site", "<p>2</p>").await.unwrap();
        studio.remember_slug("room", "site");

        let sink = Arc::new(RecordingSink::new());
        studio
            .handle("room", ControlMessage::UndoCodeChange { slug: None }, sink.clone())
            .await;
        studio
            .handle("room", ControlMessage::UndoCodeChange { slug: None }, sink.clone())
            .await;
        studio
            .handle("room", ControlMessage::RedoCodeChange { slug: Some("site".into()) }, sink.clone())
            .await;

        assert_eq!(
            sink.events(),
            vec![
                ProgressEvent::UndoResult(HistoryOutcome {
                    success: true,
                    message: "Restored version 1".into(),
                    code: Some("<p>1</p>".into()),
                }),
                ProgressEvent::UndoResult(HistoryOutcome {
                    success: false,
                    message: "Nothing to undo".into(),
                    code: None,
                }),
                ProgressEvent::RedoResult(HistoryOutcome {
                    success: true,
                    message: "Restored version 2".into(),
                    code: Some("<p>2</p>".into()),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_undo_without_project() {
        let (studio, _client, _) = studio(vec![], 1);
        let sink = Arc::new(RecordingSink::new());
        studio
            .handle("room", ControlMessage::UndoCodeChange { slug: None }, sink.clone())
            .await;
        let [ProgressEvent::UndoResult(outcome)] = &sink.events()[..] else {
            panic!("expected undoResult");
        };
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_direct_refinement() {
        let (studio, _client, _) = studio(vec![], 1);
        let services = studio.services().clone();
        services.versions.create_project("site", None).await.unwrap();
        services
            .write_project_file("site", ENTRY_FILE, "<h1>Old</h1>", None)
            .await
            .unwrap();

        let operations: Vec<PatchOperation> =
            serde_json::from_value(json!([{"type": "update", "selector": "h1", "content": "New"}])).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let handle = studio
            .handle(
                "room",
                ControlMessage::RefineProject {
                    slug: Some("site".into()),
                    user_id: None,
                    instructions: None,
                    operations: Some(operations),
                },
                sink.clone(),
            )
            .await;

        assert!(handle.is_none());
        assert!(matches!(sink.events()[..], [ProgressEvent::Completed { .. }]));
        assert_eq!(services.versions.get_current("site").await.unwrap(), Some(2));
        assert_eq!(
            services.storage.read_file("site/index.html").await.unwrap(),
            "<h1>New</h1>"
        );
    }

    #[tokio::test]
    async fn test_refine_unknown_project() {
        let (studio, _client, _) = studio(vec![], 1);
        let sink = Arc::new(RecordingSink::new());
        studio
            .handle(
                "room",
                ControlMessage::RefineProject {
                    slug: Some("ghost".into()),
                    user_id: None,
                    instructions: Some("make it blue".into()),
                    operations: None,
                },
                sink.clone(),
            )
            .await;
        assert!(matches!(sink.events()[..], [ProgressEvent::Error { .. }]));
    }
}
