use std::io;

use async_trait::async_trait;
use comms::specs::{CombinerStats, ComputePlan, ModelId, Task};
use parking_lot::Mutex;

use super::Combiner;
use crate::error::CombinerError;

type Trainer = Box<dyn Fn(&ComputePlan) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct LocalState {
    active_clients: usize,
    allowing_clients: bool,
    reachable: bool,
    failing_start: bool,
    model_id: Option<ModelId>,
    model: Option<Vec<u8>>,
    plans: Vec<ComputePlan>,
    trained: usize,
}

/// An in-process combiner.
///
/// Training plans are handed to an optional trainer closure, whatever model it
/// returns becomes the combiner's new local model under a fresh id.
pub struct LocalCombiner {
    name: String,
    state: Mutex<LocalState>,
    trainer: Option<Trainer>,
}

impl LocalCombiner {
    /// Creates a reachable `LocalCombiner` that accepts clients and never trains.
    pub fn new(name: impl Into<String>, active_clients: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LocalState {
                active_clients,
                allowing_clients: true,
                reachable: true,
                ..Default::default()
            }),
            trainer: None,
        }
    }

    /// Sets the closure that turns a training plan into a new local model.
    pub fn with_trainer<F>(mut self, trainer: F) -> Self
    where
        F: Fn(&ComputePlan) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.trainer = Some(Box::new(trainer));
        self
    }

    /// Replaces the local model.
    pub fn set_model(&self, id: ModelId, model: Vec<u8>) {
        let mut state = self.state.lock();
        state.model_id = Some(id);
        state.model = Some(model);
    }

    pub fn set_active_clients(&self, active_clients: usize) {
        self.state.lock().active_clients = active_clients;
    }

    pub fn set_allowing_clients(&self, allowing: bool) {
        self.state.lock().allowing_clients = allowing;
    }

    /// Makes every call fail as if the node went away.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Makes `start` refuse every plan while the other calls keep working.
    pub fn set_failing_start(&self, failing: bool) {
        self.state.lock().failing_start = failing;
    }

    /// The plans received so far, oldest first.
    pub fn plans(&self) -> Vec<ComputePlan> {
        self.state.lock().plans.clone()
    }

    fn check_reachable(&self) -> Result<(), CombinerError> {
        if self.state.lock().reachable {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
        }
    }
}

#[async_trait]
impl Combiner for LocalCombiner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report(&self) -> Result<CombinerStats, CombinerError> {
        self.check_reachable()?;
        Ok(CombinerStats {
            name: self.name.clone(),
            active_clients: self.state.lock().active_clients,
        })
    }

    async fn start(&self, plan: &ComputePlan) -> Result<(), CombinerError> {
        self.check_reachable()?;
        if self.state.lock().failing_start {
            return Err(CombinerError::Remote(format!("{} refused the plan", self.name)));
        }

        let trained = match (&self.trainer, plan.task) {
            (Some(trainer), Task::Training) => trainer(plan),
            _ => None,
        };

        let mut state = self.state.lock();
        state.plans.push(plan.clone());

        if let Some(model) = trained {
            state.trained += 1;
            state.model_id = Some(ModelId::new(format!("{}-local-{}", self.name, state.trained)));
            state.model = Some(model);
        }

        Ok(())
    }

    async fn set_model_id(&self, id: &ModelId) -> Result<(), CombinerError> {
        self.check_reachable()?;
        self.state.lock().model_id = Some(id.clone());
        Ok(())
    }

    async fn get_model_id(&self) -> Result<Option<ModelId>, CombinerError> {
        self.check_reachable()?;
        Ok(self.state.lock().model_id.clone())
    }

    async fn get_model(&self) -> Result<Option<Vec<u8>>, CombinerError> {
        self.check_reachable()?;
        Ok(self.state.lock().model.clone())
    }

    async fn allowing_clients(&self) -> Result<bool, CombinerError> {
        self.check_reachable()?;
        Ok(self.state.lock().allowing_clients)
    }
}
