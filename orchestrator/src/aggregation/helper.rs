use std::{num::NonZeroUsize, sync::Arc};

use serde::{Deserialize, Serialize};

use super::{FlatF32Helper, Model, SafetensorsHelper};
use crate::error::ReducerError;

/// The serialization family of a model, it picks the `ModelHelper` to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    FlatF32,
    Safetensors,
}

impl ModelKind {
    /// Creates the helper able to read and write models of this kind.
    pub fn helper(self) -> Arc<dyn ModelHelper> {
        match self {
            Self::FlatF32 => Arc::new(FlatF32Helper),
            Self::Safetensors => Arc::new(SafetensorsHelper),
        }
    }
}

/// Loads, saves and averages models of one `ModelKind`.
pub trait ModelHelper: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Deserializes a model.
    ///
    /// # Errors
    /// A `ReducerError::Format` on malformed input.
    fn load(&self, blob: &[u8]) -> Result<Model, ReducerError>;

    /// Serializes a model.
    fn save(&self, model: &Model) -> Result<Vec<u8>, ReducerError>;

    /// Folds `next` into the already initialized `running` mean.
    fn increment_average(
        &self,
        running: &mut Model,
        next: &Model,
        n: NonZeroUsize,
    ) -> Result<(), ReducerError> {
        running.increment_average(next, n)
    }
}
