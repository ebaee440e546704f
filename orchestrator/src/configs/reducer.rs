use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::RoundConfig;
use crate::{
    aggregation::{IncrementalMean, ModelKind, RandomPick, ReduceStrategy},
    error::ReducerError,
};

/// The env variable holding the path of the reducer's config file.
pub const CONFIG_ENV: &str = "REDUCER_CONFIG";

fn default_model_name() -> String {
    "global-model".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// How the updated models get combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyConfig {
    #[default]
    Mean,
    Random,
}

impl StrategyConfig {
    pub fn build(self) -> Box<dyn ReduceStrategy> {
        match self {
            Self::Mean => Box::new(IncrementalMean),
            Self::Random => Box::new(RandomPick),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinerConfig {
    pub name: String,
    pub addr: String,
}

/// Everything the `reducer` binary needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Tags every model committed by this reducer.
    pub session: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    pub model_kind: ModelKind,
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Holds the model files and the chain state.
    pub storage_dir: PathBuf,
    #[serde(with = "super::secs", default = "default_request_timeout")]
    pub request_timeout: Duration,
    pub combiners: Vec<CombinerConfig>,
    /// A model file committed as the seed when the chain is empty.
    #[serde(default)]
    pub seed: Option<PathBuf>,
    pub round: RoundConfig,
}

impl ReducerConfig {
    /// Reads and validates the config file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReducerError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            ReducerError::InvalidConfig(format!("can't read {}: {e}", path.display()))
        })?;

        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ReducerError::InvalidConfig(format!("{}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    /// Reads the config file named by `REDUCER_CONFIG`.
    pub fn from_env() -> Result<Self, ReducerError> {
        let path = env::var(CONFIG_ENV)
            .map_err(|e| ReducerError::InvalidConfig(format!("{CONFIG_ENV}: {e}")))?;
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<(), ReducerError> {
        if self.request_timeout.is_zero() {
            return Err(ReducerError::InvalidConfig(
                "request timeout must be greater than zero".into(),
            ));
        }

        for (i, combiner) in self.combiners.iter().enumerate() {
            if self.combiners[..i].iter().any(|c| c.name == combiner.name) {
                return Err(ReducerError::InvalidConfig(format!(
                    "combiner {} is listed twice",
                    combiner.name
                )));
            }
        }

        self.round.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CONFIG: &str = r#"{
        "session": "run-1",
        "model_kind": "safetensors",
        "storage_dir": "/var/lib/reducer",
        "combiners": [
            { "name": "c-0", "addr": "10.0.0.1:12080" },
            { "name": "c-1", "addr": "10.0.0.2:12080" }
        ],
        "round": { "rounds": 10, "clients_required": 2, "round_timeout": 180 }
    }"#;

    #[test]
    fn test_reads_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = ReducerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model_name, "global-model");
        assert_eq!(config.model_kind, ModelKind::Safetensors);
        assert_eq!(config.strategy, StrategyConfig::Mean);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.combiners.len(), 2);
        assert_eq!(config.round.round_timeout, Duration::from_secs(180));
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_duplicate_combiners_are_rejected() {
        let mut config: ReducerConfig = serde_json::from_str(CONFIG).unwrap();
        config.combiners[1].name = "c-0".into();

        assert!(matches!(config.validate(), Err(ReducerError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = ReducerConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ReducerError::InvalidConfig(_)));
    }
}
