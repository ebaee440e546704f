use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use comms::specs::ModelId;
use log::debug;
use parking_lot::Mutex;
use tokio::{fs, sync::Mutex as AsyncMutex};

use super::{ModelChain, ModelInfo};
use crate::error::ReducerError;

/// Durable bookkeeping of the model chain.
///
/// Each call is atomic on its own, nothing is promised across calls.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The id of the latest committed model.
    async fn latest(&self) -> Result<Option<ModelId>, ReducerError>;

    /// Records `info` and moves the latest pointer to it.
    async fn commit(&self, info: ModelInfo) -> Result<(), ReducerError>;

    /// Moves the latest pointer to a model committed out of band.
    async fn set_latest(&self, id: ModelId) -> Result<(), ReducerError>;

    async fn model_info(&self, id: &ModelId) -> Result<Option<ModelInfo>, ReducerError>;

    /// The descriptors from the latest model back to the root.
    async fn lineage(&self) -> Result<Vec<ModelInfo>, ReducerError>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    chain: Mutex<ModelChain>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn latest(&self) -> Result<Option<ModelId>, ReducerError> {
        Ok(self.chain.lock().latest().cloned())
    }

    async fn commit(&self, info: ModelInfo) -> Result<(), ReducerError> {
        self.chain.lock().commit(info)
    }

    async fn set_latest(&self, id: ModelId) -> Result<(), ReducerError> {
        self.chain.lock().set_latest(id);
        Ok(())
    }

    async fn model_info(&self, id: &ModelId) -> Result<Option<ModelInfo>, ReducerError> {
        Ok(self.chain.lock().get(id).cloned())
    }

    async fn lineage(&self) -> Result<Vec<ModelInfo>, ReducerError> {
        Ok(self.chain.lock().lineage())
    }
}

/// The model chain kept in a JSON file, rewritten as a whole on every change.
pub struct JsonStateStore {
    path: PathBuf,
    chain: AsyncMutex<ModelChain>,
}

impl JsonStateStore {
    /// Opens the store at `path`, starting an empty chain if the file doesn't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReducerError> {
        let path = path.as_ref().to_path_buf();

        let chain = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ReducerError::Storage(io::Error::new(io::ErrorKind::InvalidData, e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ModelChain::default(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            path,
            chain: AsyncMutex::new(chain),
        })
    }

    /// Applies `change` to a copy of the chain and only keeps it once it's on disk.
    async fn update<F>(&self, change: F) -> Result<(), ReducerError>
    where
        F: FnOnce(&mut ModelChain) -> Result<(), ReducerError> + Send,
    {
        let mut chain = self.chain.lock().await;
        let mut next = chain.clone();
        change(&mut next)?;

        let bytes = serde_json::to_vec_pretty(&next).map_err(io::Error::from)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("state written to {}", self.path.display());

        *chain = next;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn latest(&self) -> Result<Option<ModelId>, ReducerError> {
        Ok(self.chain.lock().await.latest().cloned())
    }

    async fn commit(&self, info: ModelInfo) -> Result<(), ReducerError> {
        self.update(|chain| chain.commit(info)).await
    }

    async fn set_latest(&self, id: ModelId) -> Result<(), ReducerError> {
        self.update(|chain| {
            chain.set_latest(id);
            Ok(())
        })
        .await
    }

    async fn model_info(&self, id: &ModelId) -> Result<Option<ModelInfo>, ReducerError> {
        Ok(self.chain.lock().await.get(id).cloned())
    }

    async fn lineage(&self) -> Result<Vec<ModelInfo>, ReducerError> {
        Ok(self.chain.lock().await.lineage())
    }
}
