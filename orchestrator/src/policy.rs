//! The decision points of a round.
//!
//! Each gate is a pure function over data the reducer already fetched and can
//! be swapped on its own through `Policies`.

use std::sync::Arc;

use comms::specs::{CombinerStats, ComputePlan};

use crate::combiner::Combiner;

/// Decides whether one combiner takes part in a round.
pub trait ParticipationPolicy: Send + Sync {
    fn admits(&self, plan: &ComputePlan, stats: &CombinerStats) -> bool;
}

/// Decides whether a round goes ahead with the selected participants.
pub trait RoundStartPolicy: Send + Sync {
    fn should_start(&self, participants: &[Arc<dyn Combiner>]) -> bool;
}

/// Decides whether the combiners that produced an update are enough to aggregate.
pub trait RoundValidityPolicy: Send + Sync {
    fn is_valid(&self, updated: &[Arc<dyn Combiner>]) -> bool;
}

/// Admits a combiner when it has at least as many active clients as the plan requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnoughClients;

impl ParticipationPolicy for EnoughClients {
    fn admits(&self, plan: &ComputePlan, stats: &CombinerStats) -> bool {
        stats.active_clients >= plan.clients_required
    }
}

/// Starts a round as long as anyone participates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyParticipant;

impl RoundStartPolicy for AnyParticipant {
    fn should_start(&self, participants: &[Arc<dyn Combiner>]) -> bool {
        !participants.is_empty()
    }
}

/// Accepts a round as long as anyone produced an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyUpdate;

impl RoundValidityPolicy for AnyUpdate {
    fn is_valid(&self, updated: &[Arc<dyn Combiner>]) -> bool {
        !updated.is_empty()
    }
}

/// The set of gates the reducer evaluates during a round.
pub struct Policies {
    pub participation: Box<dyn ParticipationPolicy>,
    pub round_start: Box<dyn RoundStartPolicy>,
    pub round_validity: Box<dyn RoundValidityPolicy>,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            participation: Box::new(EnoughClients),
            round_start: Box::new(AnyParticipant),
            round_validity: Box::new(AnyUpdate),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use comms::specs::Task;

    use super::*;
    use crate::combiner::LocalCombiner;

    fn plan(clients_required: usize) -> ComputePlan {
        ComputePlan {
            task: Task::Training,
            rounds: 1,
            model_id: None,
            clients_required,
            round_timeout: Duration::from_secs(10),
            params: Default::default(),
        }
    }

    fn stats(name: &str, active_clients: usize) -> CombinerStats {
        CombinerStats {
            name: name.into(),
            active_clients,
        }
    }

    #[test]
    fn test_participation_requires_enough_clients() {
        let policies = Policies::default();
        let plan = plan(3);

        assert!(policies.participation.admits(&plan, &stats("w1", 5)));
        assert!(policies.participation.admits(&plan, &stats("w1", 3)));
        assert!(!policies.participation.admits(&plan, &stats("w2", 0)));
    }

    #[test]
    fn test_start_and_validity_need_someone() {
        let policies = Policies::default();
        let w1: Arc<dyn Combiner> = Arc::new(LocalCombiner::new("w1", 5));

        assert!(policies.round_start.should_start(&[Arc::clone(&w1)]));
        assert!(!policies.round_start.should_start(&[]));
        assert!(policies.round_validity.is_valid(&[w1]));
        assert!(!policies.round_validity.is_valid(&[]));
    }
}
