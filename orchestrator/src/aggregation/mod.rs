//! Turning combiner models into one global model.

mod flat;
mod helper;
mod model;
mod strategy;
mod tensors;

pub use flat::{FlatF32Helper, flat_blob};
pub use helper::{ModelHelper, ModelKind};
pub use model::{Model, Tensor};
pub use strategy::{IncrementalMean, RandomPick, ReduceStrategy};
pub use tensors::SafetensorsHelper;
