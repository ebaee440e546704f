//! The reducer's state machine and round protocol.
//!
//! A run moves the reducer `idle -> instructing -> monitoring -> idle` and
//! executes a fixed amount of rounds. Every round selects participants,
//! dispatches a training plan, waits for the combiners to produce new models,
//! aggregates whatever is out of sync and commits the result as the new latest
//! model. A failed round is logged and the run carries on with the next one.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use comms::specs::{ModelId, Task};
use futures::future;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::Mutex as AsyncMutex,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregation::{IncrementalMean, Model, ModelHelper, ReduceStrategy},
    combiner::Combiner,
    configs::RoundConfig,
    error::ReducerError,
    policy::Policies,
    registry::{self, CombinerRegistry},
    state::ReducerState,
    storage::{ModelInfo, ModelRepository, StateStore},
};

/// The gate that stopped a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyGate {
    RoundStart,
    RoundValidity,
}

impl fmt::Display for PolicyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundStart => f.write_str("round start"),
            Self::RoundValidity => f.write_str("round validity"),
        }
    }
}

/// How a round that didn't fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// A new global model was committed.
    Committed(ModelId),
    /// A policy said no, nothing was committed.
    Rejected(PolicyGate),
}

/// Puts the reducer back to idle when a run ends, however it ends.
struct RunGuard<'a> {
    state: &'a Mutex<ReducerState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = ReducerState::Idle;
    }
}

/// Coordinates the combiners through rounds and owns the global model chain.
pub struct ReducerControl {
    state: Mutex<ReducerState>,
    registry: RwLock<CombinerRegistry>,
    statestore: Arc<dyn StateStore>,
    repository: Arc<dyn ModelRepository>,
    helper: Arc<dyn ModelHelper>,
    strategy: Box<dyn ReduceStrategy>,
    policies: Policies,
    session: String,
    model_name: String,
    rounds: AtomicUsize,
    shutdown: CancellationToken,
    /// Held from reading the latest pointer until the new descriptor is committed.
    commit_lock: AsyncMutex<()>,
}

impl ReducerControl {
    /// Creates an idle `ReducerControl` with no combiners, the default
    /// policies and the incremental mean strategy.
    ///
    /// # Arguments
    /// * `statestore` - Where the model chain and the latest pointer live.
    /// * `repository` - Where model blobs are stored.
    /// * `helper` - Reads, writes and averages models.
    pub fn new(
        statestore: Arc<dyn StateStore>,
        repository: Arc<dyn ModelRepository>,
        helper: Arc<dyn ModelHelper>,
    ) -> Self {
        Self {
            state: Mutex::new(ReducerState::Idle),
            registry: RwLock::new(CombinerRegistry::new()),
            statestore,
            repository,
            helper,
            strategy: Box::new(IncrementalMean),
            policies: Policies::default(),
            session: String::new(),
            model_name: String::new(),
            rounds: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            commit_lock: AsyncMutex::new(()),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ReduceStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the session tag and model name written into every committed descriptor.
    pub fn with_session(mut self, session: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.session = session.into();
        self.model_name = model_name.into();
        self
    }

    pub fn state(&self) -> ReducerState {
        *self.state.lock()
    }

    /// Leaves idle for `state`, the returned guard goes back to idle on drop.
    fn begin(&self, state: ReducerState) -> Result<RunGuard<'_>, ReducerError> {
        let mut current = self.state.lock();
        if *current != ReducerState::Idle {
            return Err(ReducerError::NotIdle(*current));
        }

        *current = state;
        debug!("reducer state: {state}");
        Ok(RunGuard { state: &self.state })
    }

    fn set_state(&self, state: ReducerState) {
        debug!("reducer state: {state}");
        *self.state.lock() = state;
    }

    /// Stops an ongoing run: the current wait ends and no further round starts.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn latest_model(&self) -> Result<Option<ModelId>, ReducerError> {
        self.statestore.latest().await
    }

    pub async fn model_info(&self, id: &ModelId) -> Result<Option<ModelInfo>, ReducerError> {
        self.statestore.model_info(id).await
    }

    /// The committed models from the latest one back to the seed.
    pub async fn lineage(&self) -> Result<Vec<ModelInfo>, ReducerError> {
        self.statestore.lineage().await
    }

    /// Registers a combiner, a combiner with the same name is kept as is.
    ///
    /// # Errors
    /// `ReducerError::NotIdle` when called during a run, the registry is left untouched.
    pub fn add(&self, combiner: Arc<dyn Combiner>) -> Result<(), ReducerError> {
        let state = self.state.lock();
        if *state != ReducerState::Idle {
            warn!("reducer is {state}, can't add combiner {}", combiner.name());
            return Err(ReducerError::NotIdle(*state));
        }

        if self.registry.write().insert(Arc::clone(&combiner)) {
            info!("adding combiner {}", combiner.name());
        } else {
            debug!("combiner {} already registered", combiner.name());
        }

        Ok(())
    }

    /// Unregisters the combiner called `name`, unknown names are only logged.
    ///
    /// # Errors
    /// `ReducerError::NotIdle` when called during a run, the registry is left untouched.
    pub fn remove(&self, name: &str) -> Result<(), ReducerError> {
        let state = self.state.lock();
        if *state != ReducerState::Idle {
            warn!("reducer is {state}, can't remove combiner {name}");
            return Err(ReducerError::NotIdle(*state));
        }

        match self.registry.write().remove(name) {
            Some(_) => info!("removed combiner {name}"),
            None => warn!("can't remove combiner {name}, it isn't registered"),
        }

        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Combiner>> {
        self.registry.read().find(name)
    }

    /// The registered combiners, in registration order.
    pub fn combiners(&self) -> Vec<Arc<dyn Combiner>> {
        self.registry.read().snapshot()
    }

    /// The first registered combiner accepting new clients.
    pub async fn find_available(&self) -> Option<Arc<dyn Combiner>> {
        registry::first_available(&self.combiners()).await
    }

    /// Points `combiners` to `model_id` as their baseline.
    ///
    /// # Errors
    /// The first combiner that couldn't be reached, the rest are still attempted.
    pub async fn sync_combiners(
        &self,
        combiners: &[Arc<dyn Combiner>],
        model_id: Option<&ModelId>,
    ) -> Result<(), ReducerError> {
        let Some(model_id) = model_id else {
            warn!("no model to sync combiners to, has the chain been seeded?");
            return Ok(());
        };

        let mut first_err = None;
        for combiner in combiners {
            if let Err(e) = combiner.set_model_id(model_id).await {
                warn!("failed to sync combiner {} to {model_id}: {e}", combiner.name());
                first_err.get_or_insert(ReducerError::remote(combiner.name(), e));
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// The combiners in `combiners` whose local model differs from `latest`.
    ///
    /// Combiners that can't be asked are left out.
    async fn out_of_sync_with(
        &self,
        combiners: &[Arc<dyn Combiner>],
        latest: Option<&ModelId>,
    ) -> Vec<Arc<dyn Combiner>> {
        let ids = future::join_all(combiners.iter().map(|c| c.get_model_id())).await;

        combiners
            .iter()
            .zip(ids)
            .filter_map(|(combiner, id)| match id {
                Ok(id) if id.as_ref() != latest => Some(Arc::clone(combiner)),
                Ok(_) => None,
                Err(e) => {
                    warn!("failed to get the model id of combiner {}: {e}", combiner.name());
                    None
                }
            })
            .collect()
    }

    /// Every registered combiner whose local model differs from the latest model.
    pub async fn out_of_sync(&self) -> Result<Vec<Arc<dyn Combiner>>, ReducerError> {
        let latest = self.latest_model().await?;
        Ok(self.out_of_sync_with(&self.combiners(), latest.as_ref()).await)
    }

    /// Polls `dispatched` until all of them moved away from `pinned`, the
    /// round timeout elapses or the reducer is shut down.
    ///
    /// # Returns
    /// How many dispatched combiners had converged at the last poll.
    async fn wait_for_convergence(
        &self,
        dispatched: &[Arc<dyn Combiner>],
        pinned: Option<&ModelId>,
        config: &RoundConfig,
    ) -> usize {
        let deadline = Instant::now() + config.round_timeout;

        loop {
            let converged = self.out_of_sync_with(dispatched, pinned).await.len();
            debug!(converged = converged, dispatched = dispatched.len(); "polled combiners");

            if converged >= dispatched.len() {
                return converged;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    warn!("shutdown requested while waiting on combiners");
                    return converged;
                }
                _ = time::sleep_until(deadline) => {
                    warn!(
                        "round timed out after {:?} with {converged}/{} combiners done",
                        config.round_timeout,
                        dispatched.len()
                    );
                    return converged;
                }
                _ = time::sleep(config.poll_interval) => {}
            }
        }
    }

    /// Executes one global round outside of a run.
    ///
    /// The reducer is in `monitoring` until the round ends, so the registry
    /// can't change underneath it.
    ///
    /// # Returns
    /// The id of the newly committed model, or the policy gate that stopped the round.
    ///
    /// # Errors
    /// `NotIdle` during a run or another round, `NoCombiners` with an empty
    /// registry, `AggregationEmpty` when no updated combiner yields a model, or
    /// a storage error while committing.
    pub async fn round(&self, config: &RoundConfig) -> Result<RoundOutcome, ReducerError> {
        config.validate()?;

        let _guard = self
            .begin(ReducerState::Monitoring)
            .inspect_err(|e| warn!("can't start a round: {e}"))?;

        self.run_round(config).await
    }

    async fn run_round(&self, config: &RoundConfig) -> Result<RoundOutcome, ReducerError> {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;

        let combiners = self.combiners();
        if combiners.is_empty() {
            warn!(round = round; "no combiners connected");
            return Err(ReducerError::NoCombiners);
        }

        // 1. Plan the round and pick who takes part.
        let latest = self.latest_model().await?;
        let plan = config.plan(Task::Training, latest.clone());

        let mut participants = Vec::with_capacity(combiners.len());
        for combiner in &combiners {
            let stats = match combiner.report().await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(round = round; "combiner {} didn't report: {e}", combiner.name());
                    continue;
                }
            };

            if self.policies.participation.admits(&plan, &stats) {
                participants.push(Arc::clone(combiner));
            } else {
                debug!(round = round; "combiner {} sits this round out: {stats:?}", combiner.name());
            }
        }

        info!(round = round; "participating: {}", names(&participants));

        if !self.policies.round_start.should_start(&participants) {
            info!(round = round; "round start policy not met");
            return Ok(RoundOutcome::Rejected(PolicyGate::RoundStart));
        }

        // 2. Sync every participant to the latest model and hand it the plan.
        let mut dispatched = Vec::with_capacity(participants.len());
        for combiner in participants {
            if self
                .sync_combiners(std::slice::from_ref(&combiner), latest.as_ref())
                .await
                .is_err()
            {
                continue;
            }

            match combiner.start(&plan).await {
                Ok(()) => dispatched.push(combiner),
                Err(e) => warn!(round = round; "failed to dispatch to combiner {}: {e}", combiner.name()),
            }
        }

        let converged = self
            .wait_for_convergence(&dispatched, latest.as_ref(), config)
            .await;
        info!(round = round; "{converged}/{} dispatched combiners produced a model", dispatched.len());

        // 3. Collect updates from every combiner, not only the ones dispatched
        //    this round, so stragglers from earlier rounds get folded in.
        let latest = self.latest_model().await?;
        let updated = self.out_of_sync_with(&self.combiners(), latest.as_ref()).await;
        info!(round = round; "updated: {}", names(&updated));

        if !self.policies.round_validity.is_valid(&updated) {
            info!(round = round; "round validity policy not met");
            return Ok(RoundOutcome::Rejected(PolicyGate::RoundValidity));
        }

        // 4. Reduce and commit.
        let model = self.strategy.reduce(self.helper.as_ref(), &updated).await?;
        let model_id = self.commit(&model, round).await?;

        // 5. Have the updated combiners validate the new model.
        let plan = config.plan(Task::Validation, Some(model_id.clone()));
        for combiner in &updated {
            if let Err(e) = combiner.start(&plan).await {
                warn!(round = round; "failed to request validation from combiner {}: {e}", combiner.name());
            }
        }

        Ok(RoundOutcome::Committed(model_id))
    }

    /// Runs `config.rounds` rounds back to back.
    ///
    /// Failed rounds are logged and skipped, only an invalid config or a run
    /// already in progress stop the whole run.
    ///
    /// # Returns
    /// The ids of the models committed during the run, oldest first.
    pub async fn instruct(&self, config: &RoundConfig) -> Result<Vec<ModelId>, ReducerError> {
        config.validate()?;

        let _guard = self
            .begin(ReducerState::Instructing)
            .inspect_err(|e| warn!("ignoring instruct: {e}"))?;

        if self.latest_model().await?.is_none() {
            warn!("no model in the model chain, it should be seeded before a run");
        }

        self.set_state(ReducerState::Monitoring);

        let mut committed = Vec::new();
        for i in 0..config.rounds {
            if self.shutdown.is_cancelled() {
                warn!("shutdown requested, skipping the remaining {} rounds", config.rounds - i);
                break;
            }

            match self.run_round(config).await {
                Ok(RoundOutcome::Committed(model_id)) => {
                    info!("global round completed, new model: {model_id}");
                    committed.push(model_id);
                }
                Ok(RoundOutcome::Rejected(gate)) => {
                    warn!("global round failed, {gate} policy not met with config {config:?}");
                }
                Err(e) => error!("global round failed: {e}, config {config:?}"),
            }
        }

        Ok(committed)
    }

    /// Stores `model` and makes it the latest model, child of the current latest.
    ///
    /// # Arguments
    /// * `model` - The model to commit.
    /// * `round` - The round that produced it.
    pub async fn commit(&self, model: &Model, round: usize) -> Result<ModelId, ReducerError> {
        let blob = self.helper.save(model)?;

        let _chain = self.commit_lock.lock().await;
        self.commit_blob(&blob, round).await
    }

    /// Must be called with `commit_lock` held.
    async fn commit_blob(&self, blob: &[u8], round: usize) -> Result<ModelId, ReducerError> {
        let parent = self.latest_model().await?;
        let parent_info = match &parent {
            Some(id) => self.model_info(id).await?,
            None => None,
        };

        let version = match (&parent, &parent_info) {
            (_, Some(info)) => info.version + 1,
            (Some(_), None) => 1,
            (None, None) => 0,
        };

        let id = self.repository.store(blob).await?;
        let info = ModelInfo {
            id: id.clone(),
            name: self.model_name.clone(),
            kind: self.helper.kind(),
            version,
            parent,
            session: self.session.clone(),
            round,
        };

        self.statestore.commit(info).await?;
        info!(round = round, version = version; "committed model {id}");
        Ok(id)
    }

    /// Commits `blob` as the first model of the chain.
    ///
    /// # Errors
    /// `Format` if the helper can't read it, `Lineage` if the chain already has a model.
    pub async fn seed(&self, blob: &[u8]) -> Result<ModelId, ReducerError> {
        self.helper.load(blob)?;

        let _chain = self.commit_lock.lock().await;
        if let Some(latest) = self.latest_model().await? {
            return Err(ReducerError::Lineage(format!(
                "the chain is already seeded, latest model is {latest}"
            )));
        }

        self.commit_blob(blob, 0).await
    }

    /// Aggregates the combiners currently out of sync without running a round.
    pub async fn resolve(&self) -> Result<Model, ReducerError> {
        let updated = self.out_of_sync().await?;
        self.strategy.reduce(self.helper.as_ref(), &updated).await
    }
}

fn names(combiners: &[Arc<dyn Combiner>]) -> String {
    let names: Vec<_> = combiners.iter().map(|c| c.name()).collect();
    format!("[{}]", names.join(", "))
}
