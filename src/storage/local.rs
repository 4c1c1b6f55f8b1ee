//! Local filesystem storage rooted at a directory

use std::path::PathBuf;

use async_trait::async_trait;

use super::{normalize_path, FileStorage, StorageError};

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let normalized = normalize_path(path)?;
        let full = self.root.join(&normalized);
        Ok((normalized, full))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<String, StorageError> {
        let (normalized, full) = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| not_found_or_io(&normalized, e))
    }

    async fn save_file(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let (_, full) = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a sibling temp file and rename so readers never see a torn file
        let tmp = full.with_extension(format!("tmp-{}", uuid::Uuid::now_v7().simple()));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let (normalized, full) = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| not_found_or_io(&normalized, e))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let (normalized, start) = self.resolve(prefix)?;
        let mut files = Vec::new();
        let mut pending = vec![(normalized, start)];

        while let Some((rel, dir)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let child_rel = format!("{}/{}", rel, name);
                if entry.file_type().await?.is_dir() {
                    pending.push((child_rel, entry.path()));
                } else {
                    files.push(child_rel);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?.1
        };
        let mut folders = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(folders),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                folders.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        folders.sort();
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_save_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage.save_file("bakery/index.html", "<h1>Hi</h1>").await.unwrap();
        storage.save_file("bakery/css/site.css", "body{}").await.unwrap();
        storage.save_file("florist/index.html", "<h1>Yo</h1>").await.unwrap();

        assert_eq!(storage.read_file("bakery/index.html").await.unwrap(), "<h1>Hi</h1>");
        assert_eq!(
            storage.list_files("bakery").await.unwrap(),
            vec!["bakery/css/site.css".to_string(), "bakery/index.html".to_string()]
        );
        assert_eq!(
            storage.list_folders("").await.unwrap(),
            vec!["bakery".to_string(), "florist".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.read_file("nope/index.html").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(storage.list_files("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.save_file("../escape.html", "x").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_zip_stream_skips_versions() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.save_file("bakery/index.html", "<p>x</p>").await.unwrap();
        storage
            .save_file("bakery/versions/bakery-1.html", "<p>old</p>")
            .await
            .unwrap();

        let mut stream = storage.create_zip_stream("bakery").await.unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }

        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names, vec!["index.html"]);
    }
}
