use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use comms::specs::ModelId;
use parking_lot::Mutex;
use tokio::fs;
use uuid::Uuid;

use crate::error::ReducerError;

/// Blob storage for serialized models.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Persists `blob` under a fresh id.
    async fn store(&self, blob: &[u8]) -> Result<ModelId, ReducerError>;

    /// Reads back a blob, `None` if the id is unknown.
    async fn fetch(&self, id: &ModelId) -> Result<Option<Vec<u8>>, ReducerError>;
}

fn fresh_id() -> ModelId {
    ModelId::new(Uuid::new_v4().to_string())
}

#[derive(Default)]
pub struct MemoryRepository {
    blobs: Mutex<HashMap<ModelId, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelRepository for MemoryRepository {
    async fn store(&self, blob: &[u8]) -> Result<ModelId, ReducerError> {
        let id = fresh_id();
        self.blobs.lock().insert(id.clone(), blob.to_vec());
        Ok(id)
    }

    async fn fetch(&self, id: &ModelId) -> Result<Option<Vec<u8>>, ReducerError> {
        Ok(self.blobs.lock().get(id).cloned())
    }
}

/// One file per model inside a directory.
#[derive(Debug, Clone)]
pub struct FsRepository {
    dir: PathBuf,
}

impl FsRepository {
    /// Opens the repository at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, ReducerError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path(&self, id: &ModelId) -> PathBuf {
        self.dir.join(format!("{id}.bin"))
    }
}

#[async_trait]
impl ModelRepository for FsRepository {
    async fn store(&self, blob: &[u8]) -> Result<ModelId, ReducerError> {
        let id = fresh_id();
        let path = self.path(&id);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, blob).await?;
        fs::rename(&tmp, &path).await?;
        Ok(id)
    }

    async fn fetch(&self, id: &ModelId) -> Result<Option<Vec<u8>>, ReducerError> {
        if id.as_str().contains(['/', '\\']) || id.as_str().starts_with('.') {
            return Ok(None);
        }

        match fs::read(self.path(id)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_store_gets_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::open(dir.path().join("models")).await.unwrap();

        let a = repo.store(b"same bytes").await.unwrap();
        let b = repo.store(b"same bytes").await.unwrap();
        assert_ne!(a, b);

        assert_eq!(repo.fetch(&a).await.unwrap().as_deref(), Some(&b"same bytes"[..]));
        assert!(repo.fetch(&"missing".into()).await.unwrap().is_none());
        assert!(repo.fetch(&"../escape".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryRepository::new();
        let id = repo.store(&[1, 2, 3]).await.unwrap();

        assert_eq!(repo.fetch(&id).await.unwrap(), Some(vec![1, 2, 3]));
        assert!(repo.fetch(&"missing".into()).await.unwrap().is_none());
    }
}
