//! Version control for a project's entry document
//!
//! Each project has an append-only list of numbered snapshots and one
//! `current_version` pointer. Every pointer move happens while holding the
//! project's mutex, so undo/redo racing with a refinement can never silently
//! overwrite each other: a refinement commits against the version it read and
//! gets [`VersionError::Conflict`] if the pointer moved in between.
//!
//! # Layout
//!
//! ```text
//! {slug}/versions/index.json              project row + version rows
//! {slug}/versions/{slug}-{millis}.html    snapshot content
//! {slug}/index.html                       live copy of the current version
//! ```
//!
//! The live copy is written by the store itself while it holds the project
//! lock (see [`VersionStore::with_live_file`]).

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

pub use store::VersionStore;

/// A persisted project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub slug: String,
    /// `None` until the first snapshot; afterwards always an existing version
    pub current_version: Option<u32>,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deployed: bool,
}

/// One immutable snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeVersion {
    pub project_slug: String,
    pub version: u32,
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Result of an undo or redo request
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStep {
    /// Pointer moved; `content` is the now-current snapshot
    Restored { version: u32, content: String },
    /// No older (undo) or newer (redo) version exists
    Nothing,
}

/// Error type for version store operations
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error("Project already exists: {0}")]
    AlreadyExists(String),
    #[error("Version {version} not found for project {slug}")]
    VersionNotFound { slug: String, version: u32 },
    #[error("Version conflict on {slug}: expected current {expected:?}, found {actual:?}")]
    Conflict {
        slug: String,
        expected: Option<u32>,
        actual: Option<u32>,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Corrupt version index: {0}")]
    Corrupt(#[from] serde_json::Error),
}
