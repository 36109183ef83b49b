//! Object storage for uploaded audio.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use heritix_shared::{HeritixError, Result};
use tracing::debug;
use url::Url;

/// Stores audio blobs and hands back a URL they can be fetched from.
#[async_trait]
pub trait AudioStore: Send + Sync {
    async fn store(&self, bytes: &[u8], name: &str) -> Result<String>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Delete a stored blob. Missing blobs are not an error.
    async fn remove(&self, url: &str) -> Result<()>;
}

/// Audio kept as files under one directory, addressed by `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalAudioStore {
    root: PathBuf,
}

impl LocalAudioStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|e| HeritixError::io(root, e))?;
        Ok(Self { root })
    }

    fn path_for(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|e| HeritixError::Storage(format!("invalid audio URL '{url}': {e}")))?;
        if parsed.scheme() != "file" {
            return Err(HeritixError::Storage(format!(
                "unsupported audio URL scheme '{}'",
                parsed.scheme()
            )));
        }
        let path = parsed
            .to_file_path()
            .map_err(|_| HeritixError::Storage(format!("invalid audio path in '{url}'")))?;
        if !path.starts_with(&self.root) {
            return Err(HeritixError::Storage(format!(
                "audio URL '{url}' is outside {}",
                self.root.display()
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl AudioStore for LocalAudioStore {
    async fn store(&self, bytes: &[u8], name: &str) -> Result<String> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(HeritixError::validation(format!("invalid audio file name '{name}'")));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| HeritixError::io(&self.root, e))?;
        let path = self.root.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| HeritixError::io(&path, e))?;

        let url = Url::from_file_path(&path)
            .map_err(|_| HeritixError::Storage(format!("cannot address {}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "audio stored");
        Ok(url.to_string())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.path_for(url)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| HeritixError::io(&path, e))
    }

    async fn remove(&self, url: &str) -> Result<()> {
        let path = self.path_for(url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HeritixError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> LocalAudioStore {
        let dir = std::env::temp_dir().join(format!("hx_audio_{}", Uuid::now_v7()));
        LocalAudioStore::new(dir).expect("store")
    }

    #[tokio::test]
    async fn store_then_fetch() {
        let store = temp_store();
        let url = store.store(b"ID3audio", "rec_1.mp3").await.expect("store");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("rec_1.mp3"));

        let bytes = store.fetch(&url).await.expect("fetch");
        assert_eq!(bytes, b"ID3audio");

        store.remove(&url).await.expect("remove");
        assert!(store.fetch(&url).await.is_err());
        store.remove(&url).await.expect("second remove is a no-op");
    }

    #[tokio::test]
    async fn rejects_foreign_urls() {
        let store = temp_store();
        assert!(store.fetch("https://example.com/a.mp3").await.is_err());
        assert!(store.fetch("file:///etc/passwd").await.is_err());
        assert!(store.store(b"x", "../escape.mp3").await.is_err());
    }
}
