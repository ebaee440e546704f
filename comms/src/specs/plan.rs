use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ModelId;

/// What a combiner should do with a compute plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Training,
    Validation,
}

/// The instructions handed to a combiner for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputePlan {
    pub task: Task,
    pub rounds: usize,
    pub model_id: Option<ModelId>,
    pub clients_required: usize,
    pub round_timeout: Duration,
    /// Task parameters forwarded untouched to the combiner.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}
