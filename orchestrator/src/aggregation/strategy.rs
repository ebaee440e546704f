use std::{num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use rand::seq::SliceRandom;

use super::{Model, ModelHelper};
use crate::{combiner::Combiner, error::ReducerError};

/// Combines the local models of a set of combiners into one model.
#[async_trait]
pub trait ReduceStrategy: Send + Sync {
    /// # Errors
    /// `ReducerError::AggregationEmpty` when no combiner yields a usable model.
    async fn reduce(
        &self,
        helper: &dyn ModelHelper,
        combiners: &[Arc<dyn Combiner>],
    ) -> Result<Model, ReducerError>;
}

/// Fetches and deserializes a combiner's model, `None` when there's nothing usable.
async fn fetch_model(helper: &dyn ModelHelper, combiner: &dyn Combiner) -> Option<Model> {
    let blob = match combiner.get_model().await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            warn!("combiner {} has no model to contribute", combiner.name());
            return None;
        }
        Err(e) => {
            warn!("failed to fetch model from combiner {}: {e}", combiner.name());
            return None;
        }
    };

    match helper.load(&blob) {
        Ok(model) => Some(model),
        Err(e) => {
            warn!("skipping model from combiner {}: {e}", combiner.name());
            None
        }
    }
}

/// Running mean over the combiners' models, every combiner weighs the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalMean;

#[async_trait]
impl ReduceStrategy for IncrementalMean {
    async fn reduce(
        &self,
        helper: &dyn ModelHelper,
        combiners: &[Arc<dyn Combiner>],
    ) -> Result<Model, ReducerError> {
        let mut running: Option<Model> = None;
        let mut i = NonZeroUsize::MIN;

        for combiner in combiners {
            let Some(next) = fetch_model(helper, combiner.as_ref()).await else {
                continue;
            };

            match running.as_mut() {
                None => running = Some(next),
                Some(model) => {
                    if let Err(e) = helper.increment_average(model, &next, i) {
                        warn!(
                            "model from combiner {} can't be folded ({e}), restarting the mean from it",
                            combiner.name()
                        );
                        *model = next;
                    }
                }
            }

            debug!(combiner = combiner.name(), i = i.get(); "model folded into the mean");
            i = i.saturating_add(1);
        }

        running.ok_or(ReducerError::AggregationEmpty)
    }
}

/// Takes the model of one combiner picked at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPick;

#[async_trait]
impl ReduceStrategy for RandomPick {
    async fn reduce(
        &self,
        helper: &dyn ModelHelper,
        combiners: &[Arc<dyn Combiner>],
    ) -> Result<Model, ReducerError> {
        let mut order = combiners.to_vec();
        order.shuffle(&mut rand::rng());

        for combiner in order {
            if let Some(model) = fetch_model(helper, combiner.as_ref()).await {
                debug!(combiner = combiner.name(); "picked model");
                return Ok(model);
            }
        }

        Err(ReducerError::AggregationEmpty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregation::{FlatF32Helper, flat_blob},
        combiner::LocalCombiner,
    };

    fn with_model(name: &str, values: &[f32]) -> Arc<dyn Combiner> {
        let combiner = LocalCombiner::new(name, 0);
        combiner.set_model(format!("{name}-m").into(), flat_blob(values));
        Arc::new(combiner)
    }

    #[tokio::test]
    async fn test_single_model_is_returned_as_is() {
        let combiners = [with_model("a", &[1.0, 2.0, 3.0])];
        let model = IncrementalMean.reduce(&FlatF32Helper, &combiners).await.unwrap();

        assert_eq!(model, FlatF32Helper.load(&flat_blob(&[1.0, 2.0, 3.0])).unwrap());
    }

    #[tokio::test]
    async fn test_nothing_usable_is_empty() {
        let silent: Arc<dyn Combiner> = Arc::new(LocalCombiner::new("silent", 0));

        let err = IncrementalMean.reduce(&FlatF32Helper, &[]).await.unwrap_err();
        assert!(matches!(err, ReducerError::AggregationEmpty));

        let err = IncrementalMean.reduce(&FlatF32Helper, &[silent]).await.unwrap_err();
        assert!(matches!(err, ReducerError::AggregationEmpty));
    }

    #[tokio::test]
    async fn test_skipped_combiners_dont_weigh_in() {
        let gone = LocalCombiner::new("gone", 0);
        gone.set_model("gone-m".into(), flat_blob(&[100.0]));
        gone.set_reachable(false);

        let broken = LocalCombiner::new("broken", 0);
        broken.set_model("broken-m".into(), vec![1, 2, 3]);

        let combiners: [Arc<dyn Combiner>; 6] = [
            with_model("a", &[2.0]),
            Arc::new(gone),
            Arc::new(LocalCombiner::new("empty", 0)),
            Arc::new(broken),
            with_model("b", &[4.0]),
            with_model("c", &[9.0]),
        ];

        let model = IncrementalMean.reduce(&FlatF32Helper, &combiners).await.unwrap();
        assert_eq!(model, Model::flat(vec![5.0]));
    }

    #[tokio::test]
    async fn test_mismatched_model_restarts_the_mean() {
        let combiners = [
            with_model("a", &[2.0]),
            with_model("b", &[1.0, 1.0]),
            with_model("c", &[3.0, 5.0]),
        ];

        let model = IncrementalMean.reduce(&FlatF32Helper, &combiners).await.unwrap();
        assert_eq!(model, Model::flat(vec![1.0 + 2.0 / 3.0, 1.0 + 4.0 / 3.0]));
    }

    #[tokio::test]
    async fn test_random_pick_returns_one_of_the_models() {
        let combiners: [Arc<dyn Combiner>; 2] = [
            Arc::new(LocalCombiner::new("empty", 0)),
            with_model("a", &[7.0]),
        ];

        let model = RandomPick.reduce(&FlatF32Helper, &combiners).await.unwrap();
        assert_eq!(model, Model::flat(vec![7.0]));
    }
}
