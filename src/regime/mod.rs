// Market regime detection module
pub mod classifier;

pub use classifier::{classify_regime, RegimeConfig};
