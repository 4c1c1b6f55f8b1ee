//! In-memory storage, used by tests and ephemeral runs

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{normalize_path, FileStorage, StorageError};

#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

/// `a/b` is under `a` but `ab/c` is not
fn under(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn read_file(&self, path: &str) -> Result<String, StorageError> {
        let path = normalize_path(path)?;
        self.files
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or(StorageError::NotFound(path))
    }

    async fn save_file(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let path = normalize_path(path)?;
        self.files.write().await.insert(path, content.to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let path = normalize_path(path)?;
        match self.files.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(path)),
        }
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = normalize_path(prefix)?;
        Ok(self
            .files
            .read()
            .await
            .keys()
            .filter(|p| under(p, &prefix))
            .cloned()
            .collect())
    }

    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if prefix.trim_matches('/').is_empty() {
            String::new()
        } else {
            normalize_path(prefix)?
        };
        let files = self.files.read().await;
        let folders: BTreeSet<String> = files
            .keys()
            .filter(|p| under(p, &prefix))
            .filter_map(|p| {
                let rest = if prefix.is_empty() { p.as_str() } else { &p[prefix.len() + 1..] };
                rest.split_once('/').map(|(dir, _)| dir.to_string())
            })
            .collect();
        Ok(folders.into_iter().collect())
    }
}
