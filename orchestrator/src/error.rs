use std::{error::Error, fmt, io, time::Duration};

use crate::state::ReducerState;

/// Failures talking to a single combiner.
#[derive(Debug)]
pub enum CombinerError {
    Io(io::Error),
    /// The combiner did not answer within the request timeout.
    Timeout(Duration),
    /// The combiner answered with a message kind that doesn't match the request.
    UnexpectedMessage(&'static str),
    /// The combiner answered with an error message.
    Remote(String),
}

impl fmt::Display for CombinerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Timeout(after) => write!(f, "no answer after {after:?}"),
            Self::UnexpectedMessage(got) => write!(f, "unexpected message: got {got}"),
            Self::Remote(msg) => write!(f, "combiner replied with an error: {msg}"),
        }
    }
}

impl Error for CombinerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CombinerError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// All errors that can occur in the reducer.
#[derive(Debug)]
pub enum ReducerError {
    /// A run or a registry mutation was attempted outside of `idle`.
    NotIdle(ReducerState),
    /// A round was attempted with an empty registry.
    NoCombiners,
    /// No combiner yielded a usable model to aggregate.
    AggregationEmpty,
    /// A combiner call failed or timed out.
    Remote {
        combiner: String,
        source: CombinerError,
    },
    /// A model couldn't be (de)serialized, or models don't have matching shapes.
    Format(String),
    /// A commit would break the model chain.
    Lineage(String),
    /// The repository or state store failed.
    Storage(io::Error),
    /// Invalid configuration, caught before any round runs.
    InvalidConfig(String),
}

impl ReducerError {
    pub(crate) fn remote(combiner: &str, source: CombinerError) -> Self {
        Self::Remote {
            combiner: combiner.to_owned(),
            source,
        }
    }
}

impl fmt::Display for ReducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotIdle(state) => write!(f, "reducer is not idle, currently {state}"),
            Self::NoCombiners => f.write_str("no combiners connected"),
            Self::AggregationEmpty => f.write_str("no combiner yielded a usable model"),
            Self::Remote { combiner, source } => write!(f, "combiner {combiner}: {source}"),
            Self::Format(msg) => write!(f, "model format error: {msg}"),
            Self::Lineage(msg) => write!(f, "model chain error: {msg}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ReducerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote { source, .. } => Some(source),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ReducerError {
    fn from(value: io::Error) -> Self {
        Self::Storage(value)
    }
}
