// Signal generation module
pub mod aggregator;

pub use aggregator::{aggregate, is_death_cross, is_golden_cross, vote, SignalConfig, TimeframeReading};
