//! Storage-backed version store
//!
//! Every mutation builds the next index on a copy. The copy replaces the
//! in-memory index only once it is persisted and the live file mirrors it,
//! so a failed write leaves both the pointer and the history untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::{CodeVersion, HistoryStep, Project, VersionError};
use crate::metrics::{HISTORY_MOVES, VERSIONS_CREATED, VERSIONS_EVICTED, VERSION_CONFLICTS};
use crate::storage::{FileStorage, StorageError};

/// Persisted form of one project
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectIndex {
    project: Project,
    versions: Vec<CodeVersion>,
    /// Highest number ever handed out; numbers are never reused
    #[serde(default)]
    last_assigned: u32,
    /// Millisecond stamp of the newest snapshot path
    #[serde(default)]
    last_stamp_ms: i64,
}

impl ProjectIndex {
    fn new(slug: &str, owner: Option<String>) -> Self {
        Self {
            project: Project {
                slug: slug.to_string(),
                current_version: None,
                assets: Vec::new(),
                owner,
                created_at: Utc::now(),
                deployed: false,
            },
            versions: Vec::new(),
            last_assigned: 0,
            last_stamp_ms: 0,
        }
    }

    fn find(&self, version: u32) -> Option<&CodeVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    fn content_ref(&self, version: u32) -> Result<String, VersionError> {
        self.find(version)
            .map(|v| v.content_ref.clone())
            .ok_or_else(|| VersionError::VersionNotFound {
                slug: self.project.slug.clone(),
                version,
            })
    }

    fn expect_current(&self, expected: Option<u32>) -> Result<(), VersionError> {
        if self.project.current_version == expected {
            return Ok(());
        }
        VERSION_CONFLICTS.inc();
        warn!(
            slug = %self.project.slug,
            ?expected,
            actual = ?self.project.current_version,
            "Current version moved under a pending write"
        );
        Err(VersionError::Conflict {
            slug: self.project.slug.clone(),
            expected,
            actual: self.project.current_version,
        })
    }

    /// Remove the oldest versions beyond `cap`, never the current one
    fn evict(&mut self, cap: usize) -> Vec<CodeVersion> {
        let current = self.project.current_version;
        self.versions.sort_by_key(|v| v.version);

        let mut excess = self.versions.len().saturating_sub(cap);
        let mut kept = Vec::with_capacity(self.versions.len());
        let mut removed = Vec::new();
        for v in std::mem::take(&mut self.versions) {
            if excess > 0 && Some(v.version) != current {
                removed.push(v);
                excess -= 1;
            } else {
                kept.push(v);
            }
        }
        self.versions = kept;
        removed
    }
}

#[derive(Default)]
struct Slot {
    loaded: bool,
    index: Option<ProjectIndex>,
}

impl Slot {
    fn require(&self, slug: &str) -> Result<&ProjectIndex, VersionError> {
        self.index
            .as_ref()
            .ok_or_else(|| VersionError::ProjectNotFound(slug.to_string()))
    }
}

/// Version store with one async mutex per project
pub struct VersionStore {
    storage: Arc<dyn FileStorage>,
    retention_cap: Option<usize>,
    /// Project-relative file kept equal to the current version's content
    live_file: Option<String>,
    slots: StdMutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

fn index_path(slug: &str) -> String {
    format!("{}/versions/index.json", slug)
}

fn content_path(slug: &str, stamp_ms: i64) -> String {
    format!("{}/versions/{}-{}.html", slug, slug, stamp_ms)
}

impl VersionStore {
    /// `retention_cap` bounds the versions kept per project (`None` keeps all)
    pub fn new(storage: Arc<dyn FileStorage>, retention_cap: Option<usize>) -> Self {
        Self {
            storage,
            retention_cap,
            live_file: None,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Mirror the current version into `{slug}/{file}` on every pointer move
    pub fn with_live_file(mut self, file: impl Into<String>) -> Self {
        self.live_file = Some(file.into());
        self
    }

    pub fn live_file(&self) -> Option<&str> {
        self.live_file.as_deref()
    }

    /// Runs under the project lock, so the live file follows pointer order
    async fn mirror(&self, slug: &str, content: &str) -> Result<(), VersionError> {
        if let Some(file) = &self.live_file {
            self.storage
                .save_file(&format!("{}/{}", slug, file), content)
                .await?;
        }
        Ok(())
    }

    pub fn storage(&self) -> &Arc<dyn FileStorage> {
        &self.storage
    }

    async fn lock(&self, slug: &str) -> Result<OwnedMutexGuard<Slot>, VersionError> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.entry(slug.to_string()).or_default().clone()
        };
        let mut guard = slot.lock_owned().await;
        if !guard.loaded {
            guard.index = match self.storage.read_file(&index_path(slug)).await {
                Ok(raw) => Some(serde_json::from_str(&raw)?),
                Err(StorageError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            guard.loaded = true;
        }
        Ok(guard)
    }

    async fn persist(&self, index: &ProjectIndex) -> Result<(), VersionError> {
        let raw = serde_json::to_string_pretty(index)?;
        self.storage
            .save_file(&index_path(&index.project.slug), &raw)
            .await?;
        Ok(())
    }

    /// Persist `next`, mirror `live` into the live file, then make `next` the
    /// in-memory index
    ///
    /// If the mirror fails the previous index is written back, so storage and
    /// memory both keep the old state.
    async fn install(&self, slot: &mut Slot, next: ProjectIndex, live: Option<&str>) -> Result<(), VersionError> {
        self.persist(&next).await?;
        if let Some(content) = live {
            if let Err(e) = self.mirror(&next.project.slug, content).await {
                let restored = match &slot.index {
                    Some(previous) => self.persist(previous).await,
                    None => self.remove_content(&index_path(&next.project.slug)).await,
                };
                if let Err(restore) = restored {
                    warn!(slug = %next.project.slug, error = %restore, "Failed to restore version index");
                }
                return Err(e);
            }
        }
        slot.index = Some(next);
        Ok(())
    }

    /// Register a new project; fails if the slug is taken
    pub async fn create_project(&self, slug: &str, owner: Option<&str>) -> Result<Project, VersionError> {
        let mut guard = self.lock(slug).await?;
        if guard.index.is_some() {
            return Err(VersionError::AlreadyExists(slug.to_string()));
        }
        let index = ProjectIndex::new(slug, owner.map(str::to_string));
        let project = index.project.clone();
        self.install(&mut guard, index, None).await?;
        info!(slug, "Project created");
        Ok(project)
    }

    pub async fn exists(&self, slug: &str) -> Result<bool, VersionError> {
        Ok(self.lock(slug).await?.index.is_some())
    }

    pub async fn project(&self, slug: &str) -> Result<Project, VersionError> {
        let guard = self.lock(slug).await?;
        Ok(guard.require(slug)?.project.clone())
    }

    /// Append a snapshot and make it current
    pub async fn snapshot(&self, slug: &str, content: &str) -> Result<u32, VersionError> {
        let mut guard = self.lock(slug).await?;
        let next = guard
            .index
            .clone()
            .unwrap_or_else(|| ProjectIndex::new(slug, None));
        self.append(&mut guard, next, content).await
    }

    /// Append a snapshot only if the current pointer still equals `expected`
    pub async fn commit(
        &self,
        slug: &str,
        expected: Option<u32>,
        content: &str,
    ) -> Result<u32, VersionError> {
        let mut guard = self.lock(slug).await?;
        let index = guard.require(slug)?;
        index.expect_current(expected)?;
        let next = index.clone();
        self.append(&mut guard, next, content).await
    }

    async fn append(&self, slot: &mut Slot, mut next: ProjectIndex, content: &str) -> Result<u32, VersionError> {
        let slug = next.project.slug.clone();

        // A new snapshot on top of an undone state discards the redo branch
        let mut abandoned = Vec::new();
        if let Some(current) = next.project.current_version {
            let (kept, dropped): (Vec<CodeVersion>, Vec<CodeVersion>) = std::mem::take(&mut next.versions)
                .into_iter()
                .partition(|v| v.version <= current);
            next.versions = kept;
            abandoned = dropped;
        }

        let now = Utc::now();
        let stamp = now.timestamp_millis().max(next.last_stamp_ms + 1);
        let created_at = DateTime::from_timestamp_millis(stamp).unwrap_or(now);
        let content_ref = content_path(&slug, stamp);
        self.storage.save_file(&content_ref, content).await?;

        let version = next.last_assigned + 1;
        next.last_assigned = version;
        next.last_stamp_ms = stamp;
        next.versions.push(CodeVersion {
            project_slug: slug.clone(),
            version,
            content_ref: content_ref.clone(),
            created_at,
        });
        next.project.current_version = Some(version);
        let evicted = match self.retention_cap {
            Some(cap) => next.evict(cap),
            None => Vec::new(),
        };

        if let Err(e) = self.install(slot, next, Some(content)).await {
            self.discard(&content_ref).await;
            return Err(e);
        }

        if !abandoned.is_empty() {
            debug!(slug = %slug, discarded = abandoned.len(), "Redo branch discarded");
        }
        self.discard_all(&slug, &abandoned).await;
        self.discard_evicted(&slug, &evicted).await;

        VERSIONS_CREATED.inc();
        info!(slug = %slug, version, "Snapshot created");
        Ok(version)
    }

    /// Delete an unreferenced blob; failures only leave garbage behind
    async fn discard(&self, content_ref: &str) {
        if let Err(e) = self.remove_content(content_ref).await {
            warn!(content_ref, error = %e, "Failed to delete unreferenced snapshot");
        }
    }

    async fn discard_all(&self, slug: &str, versions: &[CodeVersion]) {
        for v in versions {
            self.discard(&v.content_ref).await;
        }
        if !versions.is_empty() {
            debug!(slug, removed = versions.len(), "Snapshot blobs deleted");
        }
    }

    async fn discard_evicted(&self, slug: &str, evicted: &[CodeVersion]) {
        if evicted.is_empty() {
            return;
        }
        self.discard_all(slug, evicted).await;
        VERSIONS_EVICTED.inc_by(evicted.len() as f64);
        let numbers: Vec<u32> = evicted.iter().map(|v| v.version).collect();
        debug!(slug, evicted = ?numbers, "Evicted old versions");
    }

    pub async fn get_current(&self, slug: &str) -> Result<Option<u32>, VersionError> {
        Ok(self.project(slug).await?.current_version)
    }

    /// Point current at `version` and return its content
    ///
    /// The blob is read first so a missing snapshot never moves the pointer.
    async fn move_to(&self, slot: &mut Slot, slug: &str, version: u32) -> Result<String, VersionError> {
        let index = slot.require(slug)?;
        let content = self.storage.read_file(&index.content_ref(version)?).await?;
        let mut next = index.clone();
        next.project.current_version = Some(version);
        self.install(slot, next, Some(&content)).await?;
        Ok(content)
    }

    /// Point current at an existing version
    pub async fn set_current(&self, slug: &str, version: u32) -> Result<(), VersionError> {
        let mut guard = self.lock(slug).await?;
        self.move_to(&mut guard, slug, version).await?;
        Ok(())
    }

    /// Move current from `expected` to `new`, failing if it already moved
    pub async fn compare_and_set_current(
        &self,
        slug: &str,
        expected: Option<u32>,
        new: u32,
    ) -> Result<(), VersionError> {
        let mut guard = self.lock(slug).await?;
        guard.require(slug)?.expect_current(expected)?;
        self.move_to(&mut guard, slug, new).await?;
        Ok(())
    }

    /// Step back to the greatest version below current
    pub async fn undo(&self, slug: &str) -> Result<HistoryStep, VersionError> {
        self.step(slug, Direction::Back).await
    }

    /// Step forward to the smallest version above current
    pub async fn redo(&self, slug: &str) -> Result<HistoryStep, VersionError> {
        self.step(slug, Direction::Forward).await
    }

    async fn step(&self, slug: &str, direction: Direction) -> Result<HistoryStep, VersionError> {
        let mut guard = self.lock(slug).await?;
        let index = guard.require(slug)?;

        let target = index.project.current_version.and_then(|current| {
            let candidates = index.versions.iter().map(|v| v.version);
            match direction {
                Direction::Back => candidates.filter(|v| *v < current).max(),
                Direction::Forward => candidates.filter(|v| *v > current).min(),
            }
        });

        let Some(version) = target else {
            HISTORY_MOVES
                .with_label_values(&[direction.label(), "nothing"])
                .inc();
            return Ok(HistoryStep::Nothing);
        };

        let content = self.move_to(&mut guard, slug, version).await?;
        HISTORY_MOVES
            .with_label_values(&[direction.label(), "restored"])
            .inc();
        info!(slug, version, direction = direction.label(), "Current version moved");
        Ok(HistoryStep::Restored { version, content })
    }

    /// Drop the oldest versions beyond `cap`, never the current one
    pub async fn evict(&self, slug: &str, cap: usize) -> Result<Vec<u32>, VersionError> {
        let mut guard = self.lock(slug).await?;
        let mut next = guard.require(slug)?.clone();
        let evicted = next.evict(cap);
        if evicted.is_empty() {
            return Ok(Vec::new());
        }
        self.install(&mut guard, next, None).await?;
        self.discard_evicted(slug, &evicted).await;
        Ok(evicted.iter().map(|v| v.version).collect())
    }

    async fn remove_content(&self, content_ref: &str) -> Result<(), VersionError> {
        match self.storage.delete_file(content_ref).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Version rows, oldest first
    pub async fn versions(&self, slug: &str) -> Result<Vec<CodeVersion>, VersionError> {
        let guard = self.lock(slug).await?;
        let mut versions = guard.require(slug)?.versions.clone();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    pub async fn content(&self, slug: &str, version: u32) -> Result<String, VersionError> {
        let guard = self.lock(slug).await?;
        let content_ref = guard.require(slug)?.content_ref(version)?;
        Ok(self.storage.read_file(&content_ref).await?)
    }

    /// Current version number and its content, read under one lock
    pub async fn current_content(&self, slug: &str) -> Result<Option<(u32, String)>, VersionError> {
        let guard = self.lock(slug).await?;
        let index = guard.require(slug)?;
        match index.project.current_version {
            Some(version) => {
                let content = self.storage.read_file(&index.content_ref(version)?).await?;
                Ok(Some((version, content)))
            }
            None => Ok(None),
        }
    }

    pub async fn add_asset(&self, slug: &str, path: &str) -> Result<(), VersionError> {
        let mut guard = self.lock(slug).await?;
        let index = guard.require(slug)?;
        if index.project.assets.iter().any(|a| a == path) {
            return Ok(());
        }
        let mut next = index.clone();
        next.project.assets.push(path.to_string());
        self.install(&mut guard, next, None).await
    }

    pub async fn mark_deployed(&self, slug: &str) -> Result<(), VersionError> {
        let mut guard = self.lock(slug).await?;
        let mut next = guard.require(slug)?.clone();
        next.project.deployed = true;
        self.install(&mut guard, next, None).await
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Back,
    Forward,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Back => "undo",
            Direction::Forward => "redo",
        }
    }
}
