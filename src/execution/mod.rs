// Position lifecycle and the evaluation loop
pub mod engine;
pub mod position_manager;
pub mod timeframe_state;

pub use engine::{CycleAction, CycleReport, TradingEngine};
pub use position_manager::{
    LifecycleState, PendingKind, PendingOrder, PositionManager, SessionStats,
};
pub use timeframe_state::TimeframeState;
