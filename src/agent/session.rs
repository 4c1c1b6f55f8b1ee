//! Agent session: one conversation driven to a terminal state
//!
//! ```text
//! Calling ──(no tool_use)──────────────▶ Succeeded
//!    │  ▲
//!    │  └─(results appended)── Dispatching
//!    │                            │
//!    ├─(abort token set)──────────┼────▶ Aborted
//!    └─(model error / timeout)────┴────▶ Failed   (unknown tool, fatal delegation, iteration cap)
//! ```
//!
//! Every session emits exactly one terminal event. A root session's event is
//! the client-facing one (`websiteDeployed`, `completed`, `error`,
//! `aborted`); a delegated session reports a `progress` line instead, so the
//! client sees one terminal event per request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use super::AgentRole;
use crate::llm::{LlmClient, LlmError, LlmRequest, Message, StopReason, Usage};
use crate::metrics::{
    ACTIVE_SESSIONS, AGENT_ITERATIONS, AGENT_SESSIONS, LLM_CALL_DURATION, LLM_TOKENS,
};
use crate::tools::{ToolContext, ToolRegistry};
use crate::transport::ProgressEvent;

/// What a parent does when a delegated child fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationPolicy {
    /// The parent fails too
    #[default]
    Fatal,
    /// The parent sees an error tool_result and carries on
    Recoverable,
}

/// Limits applied to every session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_iterations: usize,
    pub llm_timeout: Duration,
    pub delegation_policy: DelegationPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            llm_timeout: Duration::from_secs(120),
            delegation_policy: DelegationPolicy::Fatal,
        }
    }
}

/// Why a session failed
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Model error: {0}")]
    Model(#[from] LlmError),
    #[error("Model requested unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Model signalled tool use without any tool call")]
    NoProgress,
    #[error("Stopped after {0} iterations without finishing")]
    MaxIterations(usize),
    #[error("{0}")]
    Delegation(String),
}

#[derive(Debug)]
pub enum SessionOutcome {
    /// Final assistant text
    Succeeded(String),
    Failed(SessionError),
    Aborted,
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Succeeded(_) => "succeeded",
            SessionOutcome::Failed(_) => "failed",
            SessionOutcome::Aborted => "aborted",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Succeeded(_))
    }
}

/// Everything known about a session once it has terminated
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub parent_id: Option<String>,
    pub role: AgentRole,
    pub model: String,
    pub outcome: SessionOutcome,
    pub iterations: usize,
    pub tool_calls: usize,
    pub usage: Usage,
    pub conversation: Vec<Message>,
    pub files_written: Vec<String>,
}

impl SessionReport {
    /// Report for a session whose client could not be built
    pub(crate) fn not_started(ctx: &ToolContext, parent_id: Option<String>, error: LlmError) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            parent_id,
            role: ctx.role,
            model: String::new(),
            outcome: SessionOutcome::Failed(SessionError::Model(error)),
            iterations: 0,
            tool_calls: 0,
            usage: Usage::default(),
            conversation: Vec::new(),
            files_written: Vec::new(),
        }
    }
}

/// Emit the single terminal event for a session
pub(crate) fn emit_terminal(ctx: &ToolContext, outcome: &SessionOutcome) {
    let event = if ctx.is_root() {
        match outcome {
            SessionOutcome::Succeeded(text) => match ctx.build.deployed_slug() {
                Some(slug) => ProgressEvent::WebsiteDeployed { slug },
                None => ProgressEvent::Completed {
                    message: text.clone(),
                },
            },
            SessionOutcome::Failed(e) => ProgressEvent::error(e.to_string()),
            SessionOutcome::Aborted => ProgressEvent::Aborted {
                message: "Request aborted".to_string(),
            },
        }
    } else {
        ProgressEvent::progress(match outcome {
            SessionOutcome::Succeeded(_) => format!("{} finished", ctx.role),
            SessionOutcome::Failed(e) => format!("{} failed: {}", ctx.role, e),
            SessionOutcome::Aborted => format!("{} stopped", ctx.role),
        })
    };
    ctx.sink.emit(event);
}

/// Keeps the active-session gauge right even if the run future is dropped
struct ActiveGuard;

impl ActiveGuard {
    fn enter() -> Self {
        ACTIVE_SESSIONS.inc();
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.dec();
    }
}

pub struct AgentSession {
    parent_id: Option<String>,
    client: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    ctx: ToolContext,
    config: SessionConfig,
    conversation: Vec<Message>,
    usage: Usage,
    iterations: usize,
    tool_calls: usize,
}

impl AgentSession {
    /// `tools` is the role's tool set; the session id and role come from `ctx`
    pub fn new(
        ctx: ToolContext,
        parent_id: Option<String>,
        client: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        config: SessionConfig,
    ) -> Self {
        Self {
            parent_id,
            client,
            tools,
            ctx,
            config,
            conversation: Vec::new(),
            usage: Usage::default(),
            iterations: 0,
            tool_calls: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.ctx.session_id
    }

    /// Drive the conversation to a terminal state
    pub async fn run(mut self, initial: Vec<Message>) -> SessionReport {
        let role = self.ctx.role;
        let span = info_span!(
            "agent_session",
            session_id = %self.ctx.session_id,
            role = %role,
            parent_id = ?self.parent_id,
            depth = self.ctx.depth,
            model = %self.client.model(),
            otel.name = "agent_session"
        );

        let _active = ActiveGuard::enter();
        self.conversation = initial;
        let outcome = self.drive().instrument(span).await;

        AGENT_SESSIONS
            .with_label_values(&[role.label(), outcome.label()])
            .inc();
        AGENT_ITERATIONS
            .with_label_values(&[role.label()])
            .observe(self.iterations as f64);
        match &outcome {
            SessionOutcome::Failed(e) => {
                warn!(session_id = %self.ctx.session_id, role = %role, error = %e, "Session failed")
            }
            other => info!(
                session_id = %self.ctx.session_id,
                role = %role,
                outcome = other.label(),
                iterations = self.iterations,
                tool_calls = self.tool_calls,
                tokens = self.usage.total(),
                "Session finished"
            ),
        }
        emit_terminal(&self.ctx, &outcome);

        SessionReport {
            session_id: self.ctx.session_id.clone(),
            parent_id: self.parent_id,
            role,
            model: self.client.model().to_string(),
            outcome,
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            usage: self.usage,
            files_written: self.ctx.files_written(),
            conversation: self.conversation,
        }
    }

    async fn drive(&mut self) -> SessionOutcome {
        let system_prompt = self.ctx.role.system_prompt().to_string();
        let declarations = self.tools.declarations();
        let model = self.client.model().to_string();

        loop {
            if self.ctx.cancel.is_cancelled() {
                info!(session_id = %self.ctx.session_id, iterations = self.iterations, "Abort requested");
                return SessionOutcome::Aborted;
            }
            if self.iterations >= self.config.max_iterations {
                warn!(session_id = %self.ctx.session_id, iterations = self.iterations, "Max iterations reached");
                return SessionOutcome::Failed(SessionError::MaxIterations(self.iterations));
            }
            self.iterations += 1;

            let request = LlmRequest {
                system_prompt: system_prompt.clone(),
                tools: declarations.clone(),
                messages: self.conversation.clone(),
            };
            let llm_span = info_span!(
                "llm_call",
                session_id = %self.ctx.session_id,
                iteration = self.iterations,
                model = %model,
                otel.name = "llm_call"
            );
            let call_start = Instant::now();
            let result = tokio::time::timeout(self.config.llm_timeout, self.client.send_message(&request))
                .instrument(llm_span)
                .await;
            LLM_CALL_DURATION
                .with_label_values(&[&model])
                .observe(call_start.elapsed().as_secs_f64());

            let response = match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return SessionOutcome::Failed(e.into()),
                Err(_) => {
                    return SessionOutcome::Failed(LlmError::Timeout(self.config.llm_timeout).into())
                }
            };

            self.usage += response.usage;
            LLM_TOKENS
                .with_label_values(&[&model, "input"])
                .inc_by(response.usage.input_tokens as f64);
            LLM_TOKENS
                .with_label_values(&[&model, "output"])
                .inc_by(response.usage.output_tokens as f64);
            debug!(
                session_id = %self.ctx.session_id,
                iteration = self.iterations,
                stop_reason = ?response.stop_reason,
                duration_ms = call_start.elapsed().as_millis() as u64,
                "LLM call completed"
            );

            let invocations = response.tool_invocations();
            if invocations.is_empty() {
                if response.stop_reason == StopReason::ToolUse {
                    return SessionOutcome::Failed(SessionError::NoProgress);
                }
                let text = response.text_content();
                self.conversation.push(response.into_message());
                return SessionOutcome::Succeeded(text);
            }

            self.conversation.push(response.into_message());

            // Sequential, in tool_use order
            let mut results = Vec::with_capacity(invocations.len());
            let mut failure = None;
            for invocation in &invocations {
                self.tool_calls += 1;
                let dispatched = self.tools.dispatch(invocation, &self.ctx).await;
                if dispatched.is_unhandled() {
                    failure = Some(SessionError::UnknownTool(invocation.name.clone()));
                    break;
                }
                results.extend(dispatched.blocks);
                if let Some(err) = dispatched.error {
                    if err.is_delegation() && self.config.delegation_policy == DelegationPolicy::Fatal {
                        failure = Some(SessionError::Delegation(err.to_string()));
                        break;
                    }
                }
            }
            if !results.is_empty() {
                self.conversation.push(Message::tool_results(results));
            }

            if let Some(error) = failure {
                // A child that stopped because of our own abort is not a failure
                if matches!(error, SessionError::Delegation(_)) && self.ctx.cancel.is_cancelled() {
                    return SessionOutcome::Aborted;
                }
                return SessionOutcome::Failed(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Block, LlmResponse, Role, ScriptedClient};
    use crate::storage::MemoryStorage;
    use crate::tools::builtin::builtin_registry;
    use crate::tools::{BuildState, ToolServices};
    use crate::transport::RecordingSink;
    use crate::versioning::VersionStore;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        ctx: ToolContext,
        sink: Arc<RecordingSink>,
    }

    /// Session context; with a slug the project is registered and owned by the build
    async fn harness(role: AgentRole, slug: Option<&str>) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let versions = Arc::new(VersionStore::new(storage.clone(), None).with_live_file("index.html"));
        let build = match slug {
            Some(slug) => {
                versions.create_project(slug, None).await.unwrap();
                BuildState::for_project(slug, None)
            }
            None => BuildState::new(None),
        };
        let sink = Arc::new(RecordingSink::new());
        let ctx = ToolContext::new(
            "root",
            role,
            Arc::new(ToolServices::new(storage, versions, None)),
            Arc::new(build),
            sink.clone(),
            CancellationToken::new(),
        );
        Harness { ctx, sink }
    }

    fn session(h: &Harness, client: &ScriptedClient, tools: ToolRegistry) -> AgentSession {
        AgentSession::new(
            h.ctx.clone(),
            None,
            Arc::new(client.clone()),
            tools,
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_text_response_succeeds() {
        let h = harness(AgentRole::Planner, None).await;
        let client = ScriptedClient::new(vec![LlmResponse::text("All done").with_usage(10, 5)]);
        let report = session(&h, &client, ToolRegistry::new())
            .run(vec![Message::user("Build a site")])
            .await;

        assert!(matches!(&report.outcome, SessionOutcome::Succeeded(t) if t == "All done"));
        assert_eq!(report.usage.total(), 15);
        assert_eq!(report.conversation.len(), 2);
        assert_eq!(
            h.sink.terminal_events(),
            vec![ProgressEvent::Completed { message: "All done".into() }]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_once() {
        let h = harness(AgentRole::Planner, None).await;
        let client = ScriptedClient::new(vec![
            LlmResponse::tool_calls(vec![("tu_1", "unknown_tool", json!({}))]),
            LlmResponse::text("never reached"),
        ]);
        let report = session(&h, &client, ToolRegistry::new())
            .run(vec![Message::user("go")])
            .await;

        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed(SessionError::UnknownTool(ref name)) if name == "unknown_tool"
        ));
        assert_eq!(report.iterations, 1);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.remaining(), 1);
        assert_eq!(h.sink.terminal_events().len(), 1);
        assert!(matches!(h.sink.terminal_events()[0], ProgressEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_tool_results_follow_call_order() {
        let h = harness(AgentRole::FileWriter, Some("bakery")).await;
        let client = ScriptedClient::new(vec![
            LlmResponse::tool_calls(vec![
                ("a", "write_file", json!({"path": "css/site.css", "content": "body{}"})),
                ("b", "read_file", json!({"path": "missing.js"})),
                ("c", "read_file", json!({"path": "css/site.css"})),
            ]),
            LlmResponse::text("Wrote the stylesheet"),
        ]);
        let tools = builtin_registry().subset(AgentRole::FileWriter.tool_names());
        let report = session(&h, &client, tools).run(vec![Message::user("write css")]).await;
        assert!(report.outcome.is_success());

        // Second request carries the assistant turn and one user turn of results
        let second = &client.requests()[1];
        let results = &second.messages[2];
        assert_eq!(results.role, Role::User);
        let ids: Vec<(&str, bool)> = results
            .content
            .iter()
            .filter_map(|b| match b {
                Block::ToolResult { tool_use_id, is_error, .. } => Some((tool_use_id.as_str(), *is_error)),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![("a", false), ("b", true), ("c", false)]);
        assert_eq!(report.files_written, vec!["css/site.css"]);
    }

    #[tokio::test]
    async fn test_abort_before_first_call() {
        let h = harness(AgentRole::Planner, None).await;
        h.ctx.cancel.cancel();
        let client = ScriptedClient::new(vec![LlmResponse::text("unused")]);
        let report = session(&h, &client, ToolRegistry::new()).run(vec![Message::user("go")]).await;
        assert!(matches!(report.outcome, SessionOutcome::Aborted));
        assert!(client.requests().is_empty());
        assert!(matches!(h.sink.terminal_events()[..], [ProgressEvent::Aborted { .. }]));
    }

    #[tokio::test]
    async fn test_model_error_fails_without_retry() {
        let h = harness(AgentRole::Planner, None).await;
        let client = ScriptedClient::with_results(vec![
            Err(LlmError::Api { status: 529, message: "overloaded".into() }),
            Ok(LlmResponse::text("unused")),
        ]);
        let report = session(&h, &client, ToolRegistry::new()).run(vec![Message::user("go")]).await;
        assert!(matches!(report.outcome, SessionOutcome::Failed(SessionError::Model(_))));
        assert_eq!(client.remaining(), 1);
        let [ProgressEvent::Error { error }] = &h.sink.terminal_events()[..] else {
            panic!("expected one error event");
        };
        assert!(error.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_tool_use_without_calls_is_no_progress() {
        let h = harness(AgentRole::Planner, None).await;
        let mut response = LlmResponse::text("thinking...");
        response.stop_reason = StopReason::ToolUse;
        let client = ScriptedClient::new(vec![response]);
        let report = session(&h, &client, ToolRegistry::new()).run(vec![Message::user("go")]).await;
        assert!(matches!(report.outcome, SessionOutcome::Failed(SessionError::NoProgress)));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let h = harness(AgentRole::Refiner, Some("bakery")).await;
        let calls: Vec<LlmResponse> = (0..5)
            .map(|i| LlmResponse::tool_calls(vec![(&*format!("t{}", i), "list_files", json!({}))]))
            .collect();
        let client = ScriptedClient::new(calls);
        let tools = builtin_registry().subset(AgentRole::Refiner.tool_names());
        let mut s = session(&h, &client, tools);
        s.config.max_iterations = 3;
        let report = s.run(vec![Message::user("loop")]).await;
        assert!(matches!(report.outcome, SessionOutcome::Failed(SessionError::MaxIterations(3))));
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_child_terminal_event_is_progress() {
        let h = harness(AgentRole::Planner, None).await;
        let child_ctx = h.ctx.child("child", AgentRole::FileWriter);
        let client = ScriptedClient::new(vec![LlmResponse::text("ok")]);
        let report = AgentSession::new(
            child_ctx,
            Some("root".into()),
            Arc::new(client),
            ToolRegistry::new(),
            SessionConfig::default(),
        )
        .run(vec![Message::user("write")])
        .await;
        assert!(report.outcome.is_success());
        assert!(h.sink.terminal_events().is_empty());
        assert_eq!(h.sink.events(), vec![ProgressEvent::progress("file_writer finished")]);
    }

    #[tokio::test]
    async fn test_llm_timeout() {
        struct Stuck;
        #[async_trait::async_trait]
        impl LlmClient for Stuck {
            fn model(&self) -> &str {
                "stuck"
            }
            async fn send_message(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
                std::future::pending().await
            }
        }

        let h = harness(AgentRole::Planner, None).await;
        let config = SessionConfig {
            llm_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let report = AgentSession::new(h.ctx.clone(), None, Arc::new(Stuck), ToolRegistry::new(), config)
            .run(vec![Message::user("go")])
            .await;
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed(SessionError::Model(LlmError::Timeout(_)))
        ));
    }
}
