//! Sitecraft - LLM agents that build, deploy and refine static websites
//!
//! A chat request becomes a tree of agent sessions (planner → structurer →
//! one file writer per file) that write a multi-file site through tools.
//! The entry page is versioned: every write or structured refinement is a
//! new snapshot, and undo/redo move a per-project current-version pointer.
//!
//! # Modules
//!
//! - `llm` - model clients (Anthropic, Ollama, scripted)
//! - `tools` - tool registry, dispatcher and built-in tools
//! - `agent` - session loop, roles, delegation, transcripts
//! - `versioning` - per-project snapshot store with undo/redo
//! - `refiner` - HTML tree, selectors and atomic patch application
//! - `transport` - rooms, wire events, WebSocket server
//! - `studio` - request handling: quota, builds, refinements, history
//! - `storage`, `quota`, `search` - external collaborators
//! - `config`, `telemetry`, `metrics` - configuration and observability
//!
//! # Quick Start
//!
//! ```ignore
//! use sitecraft::agent::{AgentConfig, AgentRole, AgentRuntime};
//! use sitecraft::tools::builtin::builtin_registry;
//!
//! let runtime = Arc::new(AgentRuntime::new(Arc::new(settings), builtin_registry(), AgentConfig::default()));
//! let report = runtime.run_root(ctx, vec![Block::text("A one-page site for a bakery")]).await;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod quota;
pub mod refiner;
pub mod search;
pub mod storage;
pub mod studio;
pub mod telemetry;
pub mod tools;
pub mod transport;
pub mod versioning;

pub use agent::{AgentRole, AgentRuntime};
pub use config::AppConfig;
pub use studio::{Studio, StudioError};
pub use versioning::VersionStore;
