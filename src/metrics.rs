//! Prometheus metrics for agent sessions, tools and version history
//!
//! Everything registers into the default registry; `/metrics` renders it
//! with [`gather_text`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Sessions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished sessions.
    ///
    /// Labels:
    /// - role: planner, structurer, file_writer, refiner
    /// - outcome: succeeded, failed, aborted
    pub static ref AGENT_SESSIONS: CounterVec = register_counter_vec!(
        "sitecraft_agent_sessions_total",
        "Agent sessions by role and terminal outcome",
        &["role", "outcome"]
    ).expect("failed to register AGENT_SESSIONS metric");

    /// LLM round trips a session needed before it terminated.
    pub static ref AGENT_ITERATIONS: HistogramVec = register_histogram_vec!(
        "sitecraft_agent_iterations",
        "Dispatch loop iterations per session",
        &["role"],
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    pub static ref ACTIVE_SESSIONS: Gauge = register_gauge!(
        "sitecraft_active_sessions",
        "Agent sessions currently running (root and delegated)"
    ).expect("failed to register ACTIVE_SESSIONS metric");

    /// Delegated child sessions.
    ///
    /// Labels:
    /// - role: role of the child
    /// - outcome: succeeded, failed, aborted, timeout
    pub static ref DELEGATIONS: CounterVec = register_counter_vec!(
        "sitecraft_delegations_total",
        "Delegated sub-agent runs by child role and outcome",
        &["role", "outcome"]
    ).expect("failed to register DELEGATIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tools & Model
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool invocations.
    ///
    /// Labels:
    /// - tool: registered tool name, or "unknown"
    /// - status: ok, error, unknown
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "sitecraft_tool_calls_total",
        "Tool invocations by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "sitecraft_tool_call_duration_seconds",
        "Tool execution time (delegation includes the whole child session)",
        &["tool"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "sitecraft_llm_call_duration_seconds",
        "Time spent waiting on the model per call",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    /// Labels:
    /// - model: model name
    /// - direction: input, output
    pub static ref LLM_TOKENS: CounterVec = register_counter_vec!(
        "sitecraft_llm_tokens_total",
        "Tokens consumed by model and direction",
        &["model", "direction"]
    ).expect("failed to register LLM_TOKENS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Versions & Refinement
    // ─────────────────────────────────────────────────────────────────────────────

    pub static ref VERSIONS_CREATED: Counter = register_counter!(
        "sitecraft_versions_created_total",
        "Snapshots appended to project histories"
    ).expect("failed to register VERSIONS_CREATED metric");

    pub static ref VERSIONS_EVICTED: Counter = register_counter!(
        "sitecraft_versions_evicted_total",
        "Snapshots removed by the retention cap"
    ).expect("failed to register VERSIONS_EVICTED metric");

    pub static ref VERSION_CONFLICTS: Counter = register_counter!(
        "sitecraft_version_conflicts_total",
        "Compare-and-set failures on the current version pointer"
    ).expect("failed to register VERSION_CONFLICTS metric");

    /// Labels:
    /// - outcome: applied, rejected
    pub static ref PATCHES_APPLIED: CounterVec = register_counter_vec!(
        "sitecraft_patches_total",
        "Structured patch lists by outcome",
        &["outcome"]
    ).expect("failed to register PATCHES_APPLIED metric");

    /// Labels:
    /// - direction: undo, redo
    /// - outcome: restored, nothing
    pub static ref HISTORY_MOVES: CounterVec = register_counter_vec!(
        "sitecraft_history_moves_total",
        "Undo and redo requests",
        &["direction", "outcome"]
    ).expect("failed to register HISTORY_MOVES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Studio & Rooms
    // ─────────────────────────────────────────────────────────────────────────────

    /// Labels:
    /// - outcome: deployed, completed, failed, aborted, rejected
    pub static ref BUILDS: CounterVec = register_counter_vec!(
        "sitecraft_builds_total",
        "Build requests by outcome",
        &["outcome"]
    ).expect("failed to register BUILDS metric");

    pub static ref QUOTA_REJECTIONS: Counter = register_counter!(
        "sitecraft_quota_rejections_total",
        "Builds refused for lack of credits"
    ).expect("failed to register QUOTA_REJECTIONS metric");

    pub static ref ROOM_CLIENTS: Gauge = register_gauge!(
        "sitecraft_room_clients",
        "Connected WebSocket clients across all rooms"
    ).expect("failed to register ROOM_CLIENTS metric");

    pub static ref CONTROL_MESSAGES: CounterVec = register_counter_vec!(
        "sitecraft_control_messages_total",
        "Inbound control messages by event name",
        &["event"]
    ).expect("failed to register CONTROL_MESSAGES metric");

    pub static ref RATE_LIMITED: Counter = register_counter!(
        "sitecraft_rate_limited_total",
        "Control messages dropped by the per-room rate limiter"
    ).expect("failed to register RATE_LIMITED metric");

    pub static ref BUILD_DURATION: Histogram = register_histogram!(
        "sitecraft_build_duration_seconds",
        "Wall time of a root build session",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).expect("failed to register BUILD_DURATION metric");
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
