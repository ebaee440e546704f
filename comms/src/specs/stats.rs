use serde::{Deserialize, Serialize};

/// Load statistics reported by a combiner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinerStats {
    pub name: String,
    pub active_clients: usize,
}
