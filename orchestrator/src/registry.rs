use std::sync::Arc;

use log::warn;

use crate::combiner::Combiner;

/// The known combiners, in registration order, unique by name.
#[derive(Default)]
pub struct CombinerRegistry {
    combiners: Vec<Arc<dyn Combiner>>,
}

impl CombinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `combiner` unless one with the same name is already registered.
    ///
    /// # Returns
    /// Whether the registry changed.
    pub fn insert(&mut self, combiner: Arc<dyn Combiner>) -> bool {
        if self.find(combiner.name()).is_some() {
            return false;
        }

        self.combiners.push(combiner);
        true
    }

    /// Removes the combiner called `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Combiner>> {
        let idx = self.combiners.iter().position(|c| c.name() == name)?;
        Some(self.combiners.remove(idx))
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Combiner>> {
        self.combiners.iter().find(|c| c.name() == name).cloned()
    }

    /// Clones the handles out so they can be used without holding a lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn Combiner>> {
        self.combiners.clone()
    }

    pub fn len(&self) -> usize {
        self.combiners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combiners.is_empty()
    }
}

/// Returns the first combiner, in the given order, that accepts new clients.
///
/// First fit, combiners that can't be reached are skipped.
pub async fn first_available(combiners: &[Arc<dyn Combiner>]) -> Option<Arc<dyn Combiner>> {
    for combiner in combiners {
        match combiner.allowing_clients().await {
            Ok(true) => return Some(Arc::clone(combiner)),
            Ok(false) => {}
            Err(e) => warn!("combiner {} unreachable while looking for capacity: {e}", combiner.name()),
        }
    }

    None
}
