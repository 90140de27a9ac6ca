use serde::{Deserialize, Serialize};

use super::trailing::TrailingTier;
use crate::error::EngineError;
use crate::models::{RegimeLabel, Side};

/// Risk limits for sizing new positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Share of equity put at risk per trade (0.05 = 5%)
    pub risk_fraction: f64,
    /// Cap on position notional as a share of equity (0.75 keeps a quarter of
    /// the balance free). `None` sizes on risk alone.
    pub max_notional_fraction: Option<f64>,
    pub trailing_tiers: Vec<TrailingTier>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.05,
            max_notional_fraction: Some(0.75),
            trailing_tiers: TrailingTier::default_table(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&mut self) -> Result<(), EngineError> {
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            return Err(EngineError::Config(format!(
                "risk_fraction must be in (0, 1], got {}",
                self.risk_fraction
            )));
        }
        if let Some(cap) = self.max_notional_fraction {
            if !(cap > 0.0) {
                return Err(EngineError::Config(format!(
                    "max_notional_fraction must be positive, got {}",
                    cap
                )));
            }
        }
        for tier in &self.trailing_tiers {
            if tier.lock_profit_pct > tier.trigger_profit_pct {
                return Err(EngineError::Config(format!(
                    "trailing tier locks {}% at only {}% profit",
                    tier.lock_profit_pct, tier.trigger_profit_pct
                )));
            }
        }
        self.trailing_tiers
            .sort_by(|a, b| a.trigger_profit_pct.total_cmp(&b.trigger_profit_pct));
        Ok(())
    }
}

/// Sized order for a new position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSize {
    pub quantity: f64,
    pub stop_price: f64,
    pub take_profit_price: f64,
}

/// Converts equity and risk tolerance into an order quantity
#[derive(Debug, Clone)]
pub struct RiskCalculator {
    risk_fraction: f64,
    max_notional_fraction: Option<f64>,
}

impl RiskCalculator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            risk_fraction: config.risk_fraction,
            max_notional_fraction: config.max_notional_fraction,
        }
    }

    /// Initial stop and take-profit from the regime bands
    ///
    /// Long: stop below entry, target above. Short: mirrored.
    pub fn initial_levels(side: Side, entry_price: f64, regime: RegimeLabel) -> (f64, f64) {
        let bands = regime.risk_bands();
        let stop_offset = bands.stop_pct / 100.0;
        let target_offset = bands.take_profit_pct / 100.0;

        match side {
            Side::Long => (
                entry_price * (1.0 - stop_offset),
                entry_price * (1.0 + target_offset),
            ),
            Side::Short => (
                entry_price * (1.0 + stop_offset),
                entry_price * (1.0 - target_offset),
            ),
        }
    }

    /// Size a position so that hitting the stop loses `equity * risk_fraction`,
    /// shrunk when needed so its notional stays within the cap
    ///
    /// # Errors
    /// `InvalidRisk` when the stop distance is zero, an input is not a positive
    /// finite number, or the quantity falls below the venue minimum.
    pub fn size_position(
        &self,
        equity: f64,
        entry_price: f64,
        stop_price: f64,
        side: Side,
        regime: RegimeLabel,
        min_quantity: f64,
    ) -> Result<PositionSize, EngineError> {
        for (name, value) in [("equity", equity), ("entry price", entry_price), ("stop price", stop_price)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidRisk(format!("{} must be positive, got {}", name, value)));
            }
        }

        let distance = (entry_price - stop_price).abs();
        if distance == 0.0 {
            return Err(EngineError::InvalidRisk(
                "stop price equals entry price".to_string(),
            ));
        }

        let risk_per_trade = equity * self.risk_fraction;
        let mut quantity = risk_per_trade / distance;

        if let Some(cap) = self.max_notional_fraction {
            let max_quantity = equity * cap / entry_price;
            if quantity > max_quantity {
                tracing::debug!(quantity, max_quantity, "Capping position at max notional");
                quantity = max_quantity;
            }
        }

        if quantity < min_quantity {
            return Err(EngineError::InvalidRisk(format!(
                "quantity {:.8} below venue minimum {:.8}",
                quantity, min_quantity
            )));
        }

        let (_, take_profit_price) = Self::initial_levels(side, entry_price, regime);

        Ok(PositionSize {
            quantity,
            stop_price,
            take_profit_price,
        })
    }
}
