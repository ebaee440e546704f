//! Round orchestration for federated training.
//!
//! A [`ReducerControl`] drives a set of combiners through training rounds,
//! aggregates the models they produce and keeps the chain of global models.

pub mod aggregation;
pub mod combiner;
pub mod configs;
mod control;
pub mod error;
pub mod policy;
mod registry;
mod state;
pub mod storage;

pub use combiner::{Combiner, LocalCombiner, RemoteCombiner};
pub use control::{PolicyGate, ReducerControl, RoundOutcome};
pub use error::{CombinerError, ReducerError};
pub use registry::CombinerRegistry;
pub use state::ReducerState;
