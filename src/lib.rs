// Core modules
pub mod api;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod regime;
pub mod risk;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
