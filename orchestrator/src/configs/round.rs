use std::time::Duration;

use comms::specs::{ComputePlan, ModelId, Task};
use serde::{Deserialize, Serialize};

use crate::error::ReducerError;

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// The settings of a run, shared by all its rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// How many rounds to run.
    pub rounds: usize,
    /// Active clients a combiner needs to take part in a round.
    pub clients_required: usize,
    /// How long to wait for combiners to produce a model, in seconds.
    #[serde(with = "super::secs")]
    pub round_timeout: Duration,
    /// How often combiners are polled while waiting, in seconds.
    #[serde(with = "super::secs", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Forwarded as is to the combiners.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl RoundConfig {
    pub fn new(rounds: usize, clients_required: usize, round_timeout: Duration) -> Self {
        Self {
            rounds,
            clients_required,
            round_timeout,
            poll_interval: default_poll_interval(),
            params: serde_json::Map::new(),
        }
    }

    /// Checks the settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ReducerError> {
        if self.rounds == 0 {
            return Err(ReducerError::InvalidConfig(
                "at least one round must be requested".into(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ReducerError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Builds the single round plan handed to the combiners.
    pub fn plan(&self, task: Task, model_id: Option<ModelId>) -> ComputePlan {
        ComputePlan {
            task,
            rounds: 1,
            model_id,
            clients_required: self.clients_required,
            round_timeout: self.round_timeout,
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_seconds_and_defaults() {
        let config: RoundConfig = serde_json::from_str(
            r#"{ "rounds": 3, "clients_required": 2, "round_timeout": 1.5,
                 "params": { "epochs": 4 } }"#,
        )
        .unwrap();

        assert_eq!(config.round_timeout, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.params["epochs"], 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_plan_carries_the_config() {
        let mut config = RoundConfig::new(5, 2, Duration::from_secs(30));
        config.params.insert("lr".into(), 0.1.into());

        let plan = config.plan(Task::Validation, Some("m-3".into()));
        assert_eq!(plan.task, Task::Validation);
        assert_eq!(plan.rounds, 1);
        assert_eq!(plan.model_id, Some("m-3".into()));
        assert_eq!(plan.clients_required, 2);
        assert_eq!(plan.params["lr"], 0.1);
    }

    #[test]
    fn test_rejects_meaningless_runs() {
        let config = RoundConfig::new(0, 1, Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(ReducerError::InvalidConfig(_))));

        let mut config = RoundConfig::new(1, 1, Duration::from_secs(1));
        config.poll_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ReducerError::InvalidConfig(_))));

        let parsed = serde_json::from_str::<RoundConfig>(
            r#"{ "rounds": 1, "clients_required": 1, "round_timeout": -2 }"#,
        );
        assert!(parsed.is_err());
    }
}
