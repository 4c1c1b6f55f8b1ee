//! Agent runtime: starts root sessions and runs delegated children
//!
//! A delegation tool call suspends the parent's dispatch until the child
//! session terminates. The child gets its own LLM client, the tool subset of
//! its role, and a child abort token, so aborting the root stops the whole
//! tree while a child timeout stops only that child.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use super::session::{emit_terminal, AgentSession, DelegationPolicy, SessionConfig, SessionOutcome, SessionReport};
use super::transcript::TranscriptStore;
use crate::llm::{Block, ClientFactory, Message, Role};
use crate::metrics::DELEGATIONS;
use crate::tools::{DelegationRequest, DelegationSummary, Delegator, ToolContext, ToolError, ToolRegistry};

/// Agent limits
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model turns per session before it fails
    pub max_iterations: usize,
    pub llm_timeout: Duration,
    /// Wall clock budget for one delegated session, nested children included
    pub delegation_timeout: Duration,
    pub delegation_policy: DelegationPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            llm_timeout: Duration::from_secs(120),
            delegation_timeout: Duration::from_secs(600),
            delegation_policy: DelegationPolicy::Fatal,
        }
    }
}

pub struct AgentRuntime {
    factory: Arc<dyn ClientFactory>,
    tools: ToolRegistry,
    config: AgentConfig,
    transcripts: Option<Arc<TranscriptStore>>,
}

impl AgentRuntime {
    pub fn new(factory: Arc<dyn ClientFactory>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            factory,
            tools,
            config,
            transcripts: None,
        }
    }

    pub fn with_transcripts(mut self, store: Arc<TranscriptStore>) -> Self {
        self.transcripts = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run a root session; `ctx` must be a root context
    ///
    /// The context's delegator is replaced by this runtime.
    pub async fn run_root(self: &Arc<Self>, ctx: ToolContext, prompt: Vec<Block>) -> SessionReport {
        let ctx = ctx.with_delegator(self.clone());
        let initial = vec![Message {
            role: Role::User,
            content: prompt,
        }];
        self.run_session(ctx, None, initial).await
    }

    /// Fresh root session id
    pub fn new_session_id() -> String {
        Uuid::now_v7().to_string()
    }

    async fn run_session(
        &self,
        ctx: ToolContext,
        parent_id: Option<String>,
        initial: Vec<Message>,
    ) -> SessionReport {
        let tools = self.tools.subset(ctx.role.tool_names());
        let report = match self.factory.create() {
            Ok(client) => {
                let config = SessionConfig {
                    max_iterations: self.config.max_iterations,
                    llm_timeout: self.config.llm_timeout,
                    delegation_policy: self.config.delegation_policy,
                };
                AgentSession::new(ctx, parent_id, client, tools, config)
                    .run(initial)
                    .await
            }
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "Could not create LLM client");
                let report = SessionReport::not_started(&ctx, parent_id, e);
                emit_terminal(&ctx, &report.outcome);
                report
            }
        };

        if let Some(store) = &self.transcripts {
            if let Err(e) = store.save(&report).await {
                warn!(session_id = %report.session_id, error = %e, "Failed to save transcript");
            }
        }
        report
    }
}

#[async_trait]
impl Delegator for AgentRuntime {
    async fn delegate(
        &self,
        request: DelegationRequest,
        parent: &ToolContext,
    ) -> Result<DelegationSummary, ToolError> {
        let role = request.role;
        let child_id = Uuid::now_v7().to_string();
        let child = parent.child(child_id.clone(), role);
        let child_cancel = child.cancel.clone();
        let span = info_span!(
            "delegation",
            parent_id = %parent.session_id,
            child_id = %child_id,
            role = %role,
            otel.name = "delegation"
        );

        let run = self.run_session(child, Some(parent.session_id.clone()), vec![Message::user(request.task)]);
        let report = match tokio::time::timeout(self.config.delegation_timeout, run)
            .instrument(span)
            .await
        {
            Ok(report) => report,
            Err(_) => {
                child_cancel.cancel();
                DELEGATIONS.with_label_values(&[role.label(), "timeout"]).inc();
                parent.progress(format!("{} timed out", role));
                return Err(ToolError::Delegation {
                    role: role.label().to_string(),
                    reason: format!("timed out after {:?}", self.config.delegation_timeout),
                });
            }
        };

        DELEGATIONS
            .with_label_values(&[role.label(), report.outcome.label()])
            .inc();
        match report.outcome {
            SessionOutcome::Succeeded(summary) => Ok(DelegationSummary {
                session_id: report.session_id,
                role,
                summary,
                files_written: report.files_written,
                usage: report.usage,
            }),
            SessionOutcome::Failed(e) => Err(ToolError::Delegation {
                role: role.label().to_string(),
                reason: e.to_string(),
            }),
            SessionOutcome::Aborted => Err(ToolError::Delegation {
                role: role.label().to_string(),
                reason: "aborted".to_string(),
            }),
        }
    }
}
