use std::fmt;

/// The phase the reducer is in, `Idle` between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReducerState {
    #[default]
    Idle,
    /// Preparing a run.
    Instructing,
    /// Running rounds and waiting on combiners.
    Monitoring,
}

impl fmt::Display for ReducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Instructing => "instructing",
            Self::Monitoring => "monitoring",
        };

        f.write_str(name)
    }
}
