//! Where committed models and the model chain live.

mod chain;
mod repository;
mod statestore;

pub use chain::{ModelChain, ModelInfo};
pub use repository::{FsRepository, MemoryRepository, ModelRepository};
pub use statestore::{JsonStateStore, MemoryStateStore, StateStore};
