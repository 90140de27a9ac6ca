use thiserror::Error;

use crate::models::Timeframe;

/// Failure conditions surfaced by the decision core
///
/// None of these are fatal to the evaluation loop. The variant decides how the
/// current cycle recovers:
/// - `DataUnavailable`: the timeframe abstains from this cycle's vote
/// - `InvalidRisk`: the entry is aborted for this cycle
/// - `OrderRejected`: entry stays Flat, a failed exit is retried next cycle
/// - `OrderUnconfirmed`: gateway state is queried before anything is resubmitted
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("market data unavailable for {timeframe:?}: {reason}")]
    DataUnavailable {
        timeframe: Option<Timeframe>,
        reason: String,
    },

    #[error("invalid risk parameters: {0}")]
    InvalidRisk(String),

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("order submitted but not confirmed")]
    OrderUnconfirmed,

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn data_unavailable(timeframe: Option<Timeframe>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            timeframe,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
