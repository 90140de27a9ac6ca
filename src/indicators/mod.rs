// Technical indicators module
// KDJ oscillator plus the band width / volatility measures used for regime detection

pub mod bollinger;
pub mod kdj;
pub mod moving_average;

pub use bollinger::{band_width_series, return_volatility_series, sample_std_dev};
pub use kdj::{compute_oscillator, KdjParams};
pub use moving_average::calculate_sma;
