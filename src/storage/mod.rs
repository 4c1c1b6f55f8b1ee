//! File/object storage for generated sites
//!
//! Project files live under `{slug}/...`; version snapshots under
//! `{slug}/versions/...`. Paths are always relative and `/`-separated.

pub mod local;
pub mod memory;

use std::io::Write;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream};

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Size of the chunks yielded by [`FileStorage::create_zip_stream`]
const ZIP_CHUNK_SIZE: usize = 64 * 1024;

/// Streamed byte payload (zip export)
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Storage backend for project files and version snapshots
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, StorageError>;

    async fn save_file(&self, path: &str, content: &str) -> Result<(), StorageError>;

    async fn delete_file(&self, path: &str) -> Result<(), StorageError>;

    /// All file paths under `prefix`, recursively, sorted
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Names of the immediate sub-folders of `prefix`
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, path: &str) -> bool {
        self.read_file(path).await.is_ok()
    }

    /// Zip every file under `prefix` (version snapshots excluded)
    async fn create_zip_stream(&self, prefix: &str) -> Result<ByteStream, StorageError> {
        let prefix = normalize_path(prefix)?;
        let mut entries = Vec::new();
        for path in self.list_files(&prefix).await? {
            let relative = path
                .strip_prefix(&prefix)
                .unwrap_or(&path)
                .trim_start_matches('/')
                .to_string();
            if relative.starts_with("versions/") {
                continue;
            }
            let content = self.read_file(&path).await?;
            entries.push((relative, content));
        }

        let archive = tokio::task::spawn_blocking(move || build_zip(entries))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        let chunks: Vec<Result<Bytes, StorageError>> = archive
            .chunks(ZIP_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

fn build_zip(entries: Vec<(String, String)>) -> Result<Vec<u8>, StorageError> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        writer.start_file(name, options)?;
        writer.write_all(content.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Normalise a storage path: relative, `/`-separated, no `.`/`..` segments
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    let replaced = path.replace('\\', "/");
    let mut parts = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

/// Join a project slug and a project-relative path
pub fn project_path(slug: &str, path: &str) -> Result<String, StorageError> {
    normalize_path(&format!("{}/{}", slug, normalize_path(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/site/./index.html").unwrap(), "site/index.html");
        assert_eq!(normalize_path("site\\css\\main.css").unwrap(), "site/css/main.css");
        assert!(normalize_path("site/../etc/passwd").is_err());
        assert!(normalize_path("//").is_err());
    }

    #[test]
    fn test_project_path() {
        assert_eq!(project_path("bakery", "css/site.css").unwrap(), "bakery/css/site.css");
        assert!(project_path("bakery", "../other/index.html").is_err());
    }
}
