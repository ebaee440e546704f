use std::collections::BTreeMap;

use comms::specs::ModelId;
use serde::{Deserialize, Serialize};

use crate::{aggregation::ModelKind, error::ReducerError};

/// The descriptor of a committed global model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    pub version: u64,
    /// The model this one superseded.
    pub parent: Option<ModelId>,
    /// Groups the models of one collaborative run.
    pub session: String,
    /// The round that produced this model, 0 for a seed.
    pub round: usize,
}

/// Every committed model plus the pointer to the latest one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelChain {
    latest: Option<ModelId>,
    models: BTreeMap<ModelId, ModelInfo>,
}

impl ModelChain {
    pub fn latest(&self) -> Option<&ModelId> {
        self.latest.as_ref()
    }

    pub fn get(&self, id: &ModelId) -> Option<&ModelInfo> {
        self.models.get(id)
    }

    /// Records `info` and makes it the latest model.
    ///
    /// # Errors
    /// A `ReducerError::Lineage` if the id is taken, if `info` doesn't descend
    /// from the current latest model, or if the parent is known and its version
    /// isn't lower than `info.version`.
    pub fn commit(&mut self, info: ModelInfo) -> Result<(), ReducerError> {
        if self.models.contains_key(&info.id) {
            return Err(ReducerError::Lineage(format!(
                "model {} is already committed",
                info.id
            )));
        }

        if info.parent.as_ref() != self.latest.as_ref() {
            return Err(ReducerError::Lineage(format!(
                "model {} descends from {:?} but the latest model is {:?}",
                info.id,
                info.parent.as_ref().map(ModelId::as_str),
                self.latest.as_ref().map(ModelId::as_str),
            )));
        }

        let parent = info.parent.as_ref().and_then(|id| self.models.get(id));
        if let Some(parent) = parent.filter(|p| p.version >= info.version) {
            return Err(ReducerError::Lineage(format!(
                "model {} has version {} but its parent {} has version {}",
                info.id, info.version, parent.id, parent.version
            )));
        }

        self.latest = Some(info.id.clone());
        self.models.insert(info.id.clone(), info);
        Ok(())
    }

    /// Moves the latest pointer without recording a descriptor.
    pub fn set_latest(&mut self, id: ModelId) {
        self.latest = Some(id);
    }

    /// Walks the parents from the latest model back to the root.
    pub fn lineage(&self) -> Vec<ModelInfo> {
        let mut lineage = Vec::new();
        let mut cursor = self.latest.as_ref();

        while let Some(info) = cursor.and_then(|id| self.models.get(id)) {
            lineage.push(info.clone());
            cursor = info.parent.as_ref();

            // A hand edited chain could loop, never walk more than what's stored.
            if lineage.len() > self.models.len() {
                break;
            }
        }

        lineage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, version: u64, parent: Option<&str>) -> ModelInfo {
        ModelInfo {
            id: id.into(),
            name: "model".into(),
            kind: ModelKind::FlatF32,
            version,
            parent: parent.map(ModelId::from),
            session: "test".into(),
            round: version as usize,
        }
    }

    #[test]
    fn test_lineage_walks_back_to_the_seed() {
        let mut chain = ModelChain::default();
        chain.commit(info("a0", 0, None)).unwrap();
        chain.commit(info("a1", 1, Some("a0"))).unwrap();
        chain.commit(info("a2", 2, Some("a1"))).unwrap();

        assert_eq!(chain.latest(), Some(&ModelId::from("a2")));

        let ids: Vec<_> = chain.lineage().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, ["a2", "a1", "a0"].map(ModelId::from));
    }

    #[test]
    fn test_models_are_immutable_once_committed() {
        let mut chain = ModelChain::default();
        chain.commit(info("a0", 0, None)).unwrap();

        let err = chain.commit(info("a0", 5, None)).unwrap_err();
        assert!(matches!(err, ReducerError::Lineage(_)));
        assert_eq!(chain.get(&"a0".into()).unwrap().version, 0);
    }

    #[test]
    fn test_stale_parent_would_fork_the_chain() {
        let mut chain = ModelChain::default();
        chain.commit(info("a0", 0, None)).unwrap();
        chain.commit(info("a1", 1, Some("a0"))).unwrap();

        let err = chain.commit(info("b1", 1, Some("a0"))).unwrap_err();
        assert!(matches!(err, ReducerError::Lineage(_)));

        let err = chain.commit(info("b0", 0, None)).unwrap_err();
        assert!(matches!(err, ReducerError::Lineage(_)));

        assert_eq!(chain.latest(), Some(&ModelId::from("a1")));
        assert!(chain.get(&"b1".into()).is_none());
    }

    #[test]
    fn test_versions_increase_along_parents() {
        let mut chain = ModelChain::default();
        chain.commit(info("a0", 3, None)).unwrap();

        let err = chain.commit(info("a1", 3, Some("a0"))).unwrap_err();
        assert!(matches!(err, ReducerError::Lineage(_)));
        assert_eq!(chain.latest(), Some(&ModelId::from("a0")));
    }
}
