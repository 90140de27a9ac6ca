// Risk management module
pub mod sizing;
pub mod trailing;

pub use sizing::{PositionSize, RiskCalculator, RiskConfig};
pub use trailing::{tighten_stop, TrailingTier};
