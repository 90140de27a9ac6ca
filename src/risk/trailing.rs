use serde::{Deserialize, Serialize};

use crate::models::{Position, Side};

/// Once profit reaches `trigger_profit_pct`, the stop locks in `lock_profit_pct`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingTier {
    pub trigger_profit_pct: f64,
    pub lock_profit_pct: f64,
}

impl TrailingTier {
    pub const fn new(trigger_profit_pct: f64, lock_profit_pct: f64) -> Self {
        Self {
            trigger_profit_pct,
            lock_profit_pct,
        }
    }

    /// Breakeven at 1%, then progressively more of the gain
    pub fn default_table() -> Vec<TrailingTier> {
        vec![
            TrailingTier::new(1.0, 0.0),
            TrailingTier::new(2.0, 0.5),
            TrailingTier::new(3.0, 1.25),
            TrailingTier::new(5.0, 2.5),
        ]
    }
}

/// Stop price that locks `lock_profit_pct` of the entry
fn locked_stop(position: &Position, lock_profit_pct: f64) -> f64 {
    match position.side {
        Side::Long => position.entry_price * (1.0 + lock_profit_pct / 100.0),
        Side::Short => position.entry_price * (1.0 - lock_profit_pct / 100.0),
    }
}

/// Update high-water profit and tighten the stop if a new tier was reached
///
/// The tier is chosen from the high-water mark, so a pullback never selects a
/// lower tier. The stop only moves toward the price (up for Long, down for
/// Short). Returns the new stop when it moved.
pub fn tighten_stop(position: &mut Position, mark_price: f64, tiers: &[TrailingTier]) -> Option<f64> {
    let profit = position.profit_pct(mark_price);
    if profit > position.high_water_profit {
        position.high_water_profit = profit;
    }

    let tier = tiers
        .iter()
        .filter(|t| position.high_water_profit >= t.trigger_profit_pct)
        .max_by(|a, b| a.trigger_profit_pct.total_cmp(&b.trigger_profit_pct))?;

    let candidate = locked_stop(position, tier.lock_profit_pct);
    let tighter = match position.side {
        Side::Long => candidate > position.stop_price,
        Side::Short => candidate < position.stop_price,
    };

    if tighter {
        tracing::debug!(
            symbol = %position.symbol,
            old_stop = position.stop_price,
            new_stop = candidate,
            high_water_profit = position.high_water_profit,
            "Trailing stop tightened"
        );
        position.stop_price = candidate;
        Some(candidate)
    } else {
        None
    }
}
