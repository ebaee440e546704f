//! The reducer's view of the combiner nodes.

mod local;
mod remote;

use async_trait::async_trait;
use comms::specs::{CombinerStats, ComputePlan, ModelId};

pub use local::LocalCombiner;
pub use remote::RemoteCombiner;

use crate::error::CombinerError;

/// A handle to one combiner node.
///
/// Every method may suspend on the network, implementations should bound
/// their calls with a timeout instead of blocking forever.
#[async_trait]
pub trait Combiner: Send + Sync {
    /// The unique name of this combiner.
    fn name(&self) -> &str;

    /// Fetches the current load statistics.
    async fn report(&self) -> Result<CombinerStats, CombinerError>;

    /// Hands a compute plan to the combiner, returns once it's acknowledged.
    async fn start(&self, plan: &ComputePlan) -> Result<(), CombinerError>;

    /// Sets the model the combiner should treat as its baseline.
    async fn set_model_id(&self, id: &ModelId) -> Result<(), CombinerError>;

    /// Fetches the combiner's current local model id.
    async fn get_model_id(&self) -> Result<Option<ModelId>, CombinerError>;

    /// Fetches the combiner's current local model.
    async fn get_model(&self) -> Result<Option<Vec<u8>>, CombinerError>;

    /// Whether the combiner accepts more clients.
    async fn allowing_clients(&self) -> Result<bool, CombinerError>;
}
