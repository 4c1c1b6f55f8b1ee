//! Agent orchestration
//!
//! ```text
//! StartProject ──▶ Planner session ──web_search / start_project
//!                        │
//!                        └─delegate_structure──▶ Structurer session
//!                                                    │
//!                                                    └─delegate_file ×N──▶ FileWriter session ──write_file
//!                        │
//!                        └─deploy_site ──▶ websiteDeployed
//!
//! RefineProject ──▶ Refiner session ──read_file / refine_file / write_file
//! ```
//!
//! Each session owns its conversation and its LLM client. A delegation tool
//! call blocks the parent until the child terminates; the child's summary
//! comes back as the tool result.

pub mod delegation;
pub mod roles;
pub mod session;
pub mod transcript;

pub use delegation::{AgentConfig, AgentRuntime};
pub use roles::AgentRole;
pub use session::{
    AgentSession, DelegationPolicy, SessionConfig, SessionError, SessionOutcome, SessionReport,
};
pub use transcript::{Transcript, TranscriptStore, TranscriptSummary};
