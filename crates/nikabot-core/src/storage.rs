//! Local blob storage backing the `/upload` and `/files/{filename}` HTTP
//! endpoints and the transport adapters' media-to-URL conversion. Out of
//! scope names "media upload to a blob store" as an external collaborator
//! contract — this is the minimal filesystem-backed implementation of
//! that contract a single-process deployment needs, not a real object
//! store.

use std::path::{Path, PathBuf};

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub url: String,
    pub filename: String,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Writable directory plus the externally-reachable base URL used to
/// build `/files/{filename}` links for downstream HTTP consumers (the
/// upstream workflow, or a Telegram adapter handing a photo off as
/// `message.image_url`).
#[derive(Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    public_base_url: String,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Persists `bytes` under a fresh UUID filename, preserving `ext` (no
    /// leading dot) if given, and returns the public URL.
    pub async fn save(&self, bytes: &[u8], ext: Option<&str>, mime_type: &str) -> Result<UploadedFile> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let filename = match ext {
            Some(ext) if !ext.is_empty() => format!("{}.{ext}", Uuid::new_v4()),
            _ => Uuid::new_v4().to_string(),
        };
        let path = self.base_dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;
        let url = format!("{}/files/{filename}", self.public_base_url.trim_end_matches('/'));
        Ok(UploadedFile {
            url,
            filename,
            mime_type: mime_type.to_string(),
        })
    }

    /// Reads back a previously-saved file by its stored filename. Rejects
    /// any filename containing a path separator to keep callers from
    /// escaping `base_dir` via a crafted `GET /files/{filename}` request.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        if filename.contains('/') || filename.contains('\\') || filename == ".." {
            return Err(StorageError::NotFound(filename.to_string()));
        }
        let path = self.path_for(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        Path::new(&self.base_dir).join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("nikabot-test-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir, "http://localhost:8080");
        let uploaded = store.save(b"hello", Some("txt"), "text/plain").await.unwrap();
        assert!(uploaded.url.ends_with(&format!("/files/{}", uploaded.filename)));
        let read_back = store.read(&uploaded.filename).await.unwrap();
        assert_eq!(read_back, b"hello");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn read_rejects_path_traversal() {
        let dir = std::env::temp_dir().join(format!("nikabot-test-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir, "http://localhost:8080");
        assert!(store.read("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let dir = std::env::temp_dir().join(format!("nikabot-test-{}", Uuid::new_v4()));
        let store = FileStore::new(&dir, "http://localhost:8080");
        assert!(matches!(store.read("missing.txt").await, Err(StorageError::NotFound(_))));
    }
}
