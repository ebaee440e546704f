//! The settings of the reducer binary and of its runs.

mod reducer;
mod round;
mod secs;

pub use reducer::{CONFIG_ENV, CombinerConfig, ReducerConfig, StrategyConfig};
pub use round::RoundConfig;
