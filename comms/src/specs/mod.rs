mod model;
mod plan;
mod stats;

pub use model::ModelId;
pub use plan::{ComputePlan, Task};
pub use stats::CombinerStats;
