use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::gateway::{Fill, OrderIntent, OrderOutcome, OrderSide, OrderStatus};
use crate::models::{
    ClosedPosition, ExitReason, Position, RegimeLabel, Side, SignalResult, Timeframe, TrendBias,
};
use crate::risk::{tighten_stop, RiskCalculator, TrailingTier};

/// Quantities below this are treated as fully closed
const QUANTITY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Flat,
    Open,
    /// An exit order is in flight
    Closing,
}

/// What a pending order was meant to do
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PendingKind {
    Entry { side: Side, regime: RegimeLabel },
    Exit { reason: ExitReason },
}

/// An order submitted to the gateway whose final outcome is not yet known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub intent: OrderIntent,
    pub kind: PendingKind,
    pub submitted_at: DateTime<Utc>,
}

impl PendingOrder {
    pub fn client_order_id(&self) -> Uuid {
        self.intent.client_order_id
    }
}

/// Realized results of the current session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub trades: u32,
    pub wins: u32,
    pub realized_pnl: f64,
}

impl SessionStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }
}

/// State machine for the single position of one instrument
///
/// The manager never talks to the venue. It plans intents, and the caller
/// reports back what the gateway said through `apply_outcome` or
/// `apply_status`. A failed exit never clears the position.
pub struct PositionManager {
    symbol: String,
    tiers: Vec<TrailingTier>,
    allow_short: bool,
    trend_filter: bool,
    position: Option<Position>,
    pending: Option<PendingOrder>,
    stats: SessionStats,
}

impl PositionManager {
    pub fn new(symbol: &str, tiers: Vec<TrailingTier>) -> Self {
        Self {
            symbol: symbol.to_string(),
            tiers,
            allow_short: true,
            trend_filter: true,
            position: None,
            pending: None,
            stats: SessionStats::default(),
        }
    }

    /// Spot markets cannot open shorts
    pub fn with_shorts(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    pub fn with_trend_filter(mut self, enabled: bool) -> Self {
        self.trend_filter = enabled;
        self
    }

    /// Resume from persisted state
    pub fn restore(&mut self, position: Option<Position>, pending: Option<PendingOrder>) {
        if let Some(pos) = &position {
            tracing::info!(
                symbol = %pos.symbol,
                side = ?pos.side,
                entry = pos.entry_price,
                quantity = pos.quantity,
                stop = pos.stop_price,
                "Restored open position"
            );
        }
        if let Some(order) = &pending {
            tracing::info!(
                client_order_id = %order.client_order_id(),
                kind = ?order.kind,
                "Restored pending order, will reconcile before trading"
            );
        }
        self.position = position;
        self.pending = pending;
    }

    pub fn state(&self) -> LifecycleState {
        match (&self.position, &self.pending) {
            (Some(_), Some(p)) if matches!(p.kind, PendingKind::Exit { .. }) => LifecycleState::Closing,
            (Some(_), _) => LifecycleState::Open,
            (None, _) => LifecycleState::Flat,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Tighten the trailing stop of the open position
    pub fn update_trailing(&mut self, mark_price: f64) -> Option<f64> {
        let position = self.position.as_mut()?;
        tighten_stop(position, mark_price, &self.tiers)
    }

    /// Exit reason for the open position at `mark_price`, if any
    ///
    /// A pending retry wins over fresh triggers. Stop and take-profit levels
    /// are inclusive.
    pub fn exit_trigger(&self, mark_price: f64, signal: Option<&SignalResult>) -> Option<ExitReason> {
        let position = self.position.as_ref()?;

        if let Some(reason) = position.exit_request {
            return Some(reason);
        }

        let (stop_hit, target_hit) = match position.side {
            Side::Long => (
                mark_price <= position.stop_price,
                mark_price >= position.take_profit_price,
            ),
            Side::Short => (
                mark_price >= position.stop_price,
                mark_price <= position.take_profit_price,
            ),
        };

        if stop_hit {
            return Some(ExitReason::StopLoss);
        }
        if target_hit {
            return Some(ExitReason::TakeProfit);
        }
        if signal.is_some_and(|s| s.opposes(position.side)) {
            return Some(ExitReason::OpposingSignal);
        }

        None
    }

    /// True when higher timeframes lean against `side`
    ///
    /// Trending: both 4h and 1h must disagree. Ranging: 1h alone is enough.
    pub fn trend_veto(&self, side: Side, signal: &SignalResult) -> bool {
        if !self.trend_filter {
            return false;
        }

        let against = match side {
            Side::Long => TrendBias::Bearish,
            Side::Short => TrendBias::Bullish,
        };
        let leans_against = |tf: Timeframe| signal.trend.get(&tf) == Some(&against);

        match signal.regime {
            RegimeLabel::Trending => leans_against(Timeframe::H4) && leans_against(Timeframe::H1),
            RegimeLabel::Ranging => leans_against(Timeframe::H1),
        }
    }

    /// Build an entry intent for `signal`, or None when no entry is allowed
    ///
    /// The stop is placed from `mark_price` for sizing. Once filled, the
    /// levels are recomputed from the fill price.
    ///
    /// # Errors
    /// `InvalidRisk` when sizing fails. Nothing is recorded in that case.
    pub fn plan_entry(
        &mut self,
        signal: &SignalResult,
        mark_price: f64,
        equity: f64,
        min_quantity: f64,
        calculator: &RiskCalculator,
    ) -> Result<Option<OrderIntent>, EngineError> {
        if self.position.is_some() || self.pending.is_some() {
            return Ok(None);
        }
        let Some(side) = signal.direction.side() else {
            return Ok(None);
        };
        if signal.confidence_score < signal.threshold {
            return Ok(None);
        }
        if side == Side::Short && !self.allow_short {
            tracing::info!(symbol = %self.symbol, "Short signal ignored: market does not allow shorts");
            return Ok(None);
        }
        if self.trend_veto(side, signal) {
            tracing::info!(
                symbol = %self.symbol,
                side = ?side,
                trend = ?signal.trend,
                "Entry vetoed by higher timeframe trend"
            );
            return Ok(None);
        }

        let (stop_price, _) = RiskCalculator::initial_levels(side, mark_price, signal.regime);
        let size = calculator.size_position(
            equity,
            mark_price,
            stop_price,
            side,
            signal.regime,
            min_quantity,
        )?;

        let intent = OrderIntent::market(&self.symbol, OrderSide::opening(side), size.quantity, mark_price);
        self.pending = Some(PendingOrder {
            intent: intent.clone(),
            kind: PendingKind::Entry {
                side,
                regime: signal.regime,
            },
            submitted_at: Utc::now(),
        });

        Ok(Some(intent))
    }

    /// Build an exit intent for the whole remaining quantity
    pub fn plan_exit(&mut self, reason: ExitReason, mark_price: f64) -> Option<OrderIntent> {
        if self.pending.is_some() {
            return None;
        }
        let position = self.position.as_ref()?;

        let intent = OrderIntent::market(
            &self.symbol,
            OrderSide::closing(position.side),
            position.quantity,
            mark_price,
        );
        self.pending = Some(PendingOrder {
            intent: intent.clone(),
            kind: PendingKind::Exit { reason },
            submitted_at: Utc::now(),
        });

        Some(intent)
    }

    /// Apply the immediate result of a submit
    pub fn apply_outcome(&mut self, outcome: OrderOutcome) -> Option<ClosedPosition> {
        match outcome {
            OrderOutcome::Filled(fill) => self.apply_fill(fill),
            OrderOutcome::Rejected { reason } => {
                self.on_rejected(&reason);
                None
            }
            OrderOutcome::Unconfirmed => {
                self.on_unconfirmed();
                None
            }
        }
    }

    /// Apply the result of an `order_status` query for the pending order
    pub fn apply_status(&mut self, status: OrderStatus) -> Option<ClosedPosition> {
        match status {
            OrderStatus::Filled(fill) => self.apply_fill(fill),
            OrderStatus::Rejected { reason } => {
                self.on_rejected(&reason);
                None
            }
            OrderStatus::Working => {
                tracing::info!("Pending order still working");
                None
            }
            OrderStatus::NotFound => {
                // Never reached the venue: safe to plan again with a new id
                self.on_rejected("order not found at venue");
                None
            }
        }
    }

    /// Keep the pending order; the next cycle queries its status first
    pub fn on_unconfirmed(&mut self) {
        if let Some(order) = &self.pending {
            tracing::warn!(
                client_order_id = %order.client_order_id(),
                kind = ?order.kind,
                "Order outcome unconfirmed, will query status next cycle"
            );
        }
    }

    fn on_rejected(&mut self, reason: &str) {
        let Some(order) = self.pending.take() else {
            return;
        };

        match order.kind {
            PendingKind::Entry { side, .. } => {
                tracing::warn!(
                    symbol = %self.symbol,
                    side = ?side,
                    quantity = order.intent.quantity,
                    reason,
                    "Entry order rejected, staying flat"
                );
            }
            PendingKind::Exit { reason: exit_reason } => {
                tracing::error!(
                    symbol = %self.symbol,
                    quantity = order.intent.quantity,
                    reason,
                    "Exit order rejected, will retry next cycle"
                );
                if let Some(position) = self.position.as_mut() {
                    position.exit_request = Some(exit_reason);
                }
            }
        }
    }

    /// Apply a confirmed fill of the pending order
    ///
    /// A fill that does not match the pending client order id is ignored, so
    /// reporting the same fill twice closes the position once.
    pub fn apply_fill(&mut self, fill: Fill) -> Option<ClosedPosition> {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.client_order_id() == fill.client_order_id);
        if !matches {
            tracing::warn!(
                client_order_id = %fill.client_order_id,
                "Ignoring fill that does not match the pending order"
            );
            return None;
        }
        let order = self.pending.take()?;

        match order.kind {
            PendingKind::Entry { side, regime } => {
                self.open_from_fill(side, regime, &fill);
                None
            }
            PendingKind::Exit { reason } => self.close_from_fill(reason, &fill),
        }
    }

    fn open_from_fill(&mut self, side: Side, regime: RegimeLabel, fill: &Fill) {
        let (stop_price, take_profit_price) = RiskCalculator::initial_levels(side, fill.price, regime);
        let notional = fill.price * fill.quantity;
        let fee_rate = if notional > 0.0 { fill.fee / notional } else { 0.0 };

        let position = Position {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            side,
            entry_price: fill.price,
            quantity: fill.quantity,
            stop_price,
            take_profit_price,
            high_water_profit: 0.0,
            opened_at: fill.filled_at,
            regime,
            exit_request: None,
            // The entry commission is part of the trade's result
            realized_pnl: -fill.fee,
            fee_rate,
        };

        tracing::info!(
            symbol = %position.symbol,
            side = ?side,
            entry = position.entry_price,
            quantity = position.quantity,
            stop = position.stop_price,
            target = position.take_profit_price,
            regime = %regime,
            "Position opened"
        );

        self.position = Some(position);
    }

    fn close_from_fill(&mut self, reason: ExitReason, fill: &Fill) -> Option<ClosedPosition> {
        let position = self.position.as_mut()?;

        let closed_quantity = fill.quantity.min(position.quantity);
        position.realized_pnl += position.pnl(fill.price, closed_quantity) - fill.fee;
        position.quantity -= closed_quantity;

        if position.quantity > QUANTITY_EPSILON {
            tracing::warn!(
                symbol = %position.symbol,
                filled = closed_quantity,
                remaining = position.quantity,
                "Partial exit fill, retrying the remainder"
            );
            position.exit_request = Some(reason);
            return None;
        }

        let mut position = self.position.take()?;
        position.exit_request = None;
        let realized_pnl = position.realized_pnl;

        self.stats.trades += 1;
        if realized_pnl > 0.0 {
            self.stats.wins += 1;
        }
        self.stats.realized_pnl += realized_pnl;

        tracing::info!(
            symbol = %position.symbol,
            side = ?position.side,
            entry = position.entry_price,
            exit = fill.price,
            reason = ?reason,
            pnl = realized_pnl,
            "Position closed"
        );

        Some(ClosedPosition {
            position,
            exit_price: fill.price,
            exit_reason: reason,
            realized_pnl,
            closed_at: fill.filled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::risk::RiskConfig;
    use std::collections::{BTreeMap, BTreeSet};

    fn signal(direction: Direction, score: u32, regime: RegimeLabel) -> SignalResult {
        SignalResult {
            direction,
            confidence_score: score,
            score: score as i32 * direction.sign(),
            threshold: regime.signal_threshold(),
            regime,
            contributing: BTreeSet::new(),
            votes: BTreeMap::new(),
            abstained: BTreeSet::new(),
            trend: BTreeMap::new(),
        }
    }

    fn manager() -> PositionManager {
        PositionManager::new("BTCUSDT", TrailingTier::default_table())
    }

    fn calculator() -> RiskCalculator {
        RiskCalculator::new(&RiskConfig::default())
    }

    fn fill_for(intent: &OrderIntent, price: f64) -> Fill {
        Fill {
            client_order_id: intent.client_order_id,
            price,
            quantity: intent.quantity,
            fee: 0.0,
            filled_at: Utc::now(),
        }
    }

    fn open_long(pm: &mut PositionManager, price: f64) {
        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        let intent = pm
            .plan_entry(&sig, price, 10000.0, 0.0, &calculator())
            .unwrap()
            .unwrap();
        pm.apply_outcome(OrderOutcome::Filled(fill_for(&intent, price)));
    }

    #[test]
    fn test_entry_opens_from_fill_price() {
        let mut pm = manager();
        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        let intent = pm
            .plan_entry(&sig, 100.0, 10000.0, 0.0, &calculator())
            .unwrap()
            .unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(pm.state(), LifecycleState::Flat);

        // Venue filled higher than the mark
        pm.apply_outcome(OrderOutcome::Filled(fill_for(&intent, 102.0)));

        let pos = pm.position().unwrap();
        assert_eq!(pm.state(), LifecycleState::Open);
        assert_eq!(pos.entry_price, 102.0);
        assert!((pos.stop_price - 102.0 * 0.985).abs() < 1e-9);
        assert!((pos.take_profit_price - 102.0 * 1.025).abs() < 1e-9);
        assert!(pm.pending().is_none());
    }

    #[test]
    fn test_below_threshold_no_entry() {
        let mut pm = manager();
        let sig = signal(Direction::Long, 5, RegimeLabel::Ranging);
        let planned = pm.plan_entry(&sig, 100.0, 10000.0, 0.0, &calculator()).unwrap();
        assert!(planned.is_none());
        assert!(pm.pending().is_none());
    }

    #[test]
    fn test_no_pyramiding() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);

        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        let planned = pm.plan_entry(&sig, 101.0, 10000.0, 0.0, &calculator()).unwrap();
        assert!(planned.is_none());
    }

    #[test]
    fn test_spot_blocks_short() {
        let mut pm = manager().with_shorts(false);
        let sig = signal(Direction::Short, 10, RegimeLabel::Trending);
        assert!(pm
            .plan_entry(&sig, 100.0, 10000.0, 0.0, &calculator())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_trend_veto() {
        let pm = manager();
        let mut sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        sig.trend.insert(Timeframe::H1, TrendBias::Bearish);
        assert!(!pm.trend_veto(Side::Long, &sig));

        sig.trend.insert(Timeframe::H4, TrendBias::Bearish);
        assert!(pm.trend_veto(Side::Long, &sig));
        assert!(!pm.trend_veto(Side::Short, &sig));

        let mut ranging = signal(Direction::Long, 8, RegimeLabel::Ranging);
        ranging.trend.insert(Timeframe::H1, TrendBias::Bearish);
        assert!(pm.trend_veto(Side::Long, &ranging));

        let disabled = manager().with_trend_filter(false);
        assert!(!disabled.trend_veto(Side::Long, &sig));
    }

    #[test]
    fn test_invalid_risk_leaves_manager_flat() {
        let mut pm = manager();
        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        // Minimum quantity far above what 5% risk can buy
        let result = pm.plan_entry(&sig, 100.0, 10000.0, 1e9, &calculator());
        assert!(matches!(result, Err(EngineError::InvalidRisk(_))));
        assert!(pm.pending().is_none());
        assert_eq!(pm.state(), LifecycleState::Flat);
    }

    #[test]
    fn test_rejected_entry_stays_flat() {
        let mut pm = manager();
        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        pm.plan_entry(&sig, 100.0, 10000.0, 0.0, &calculator()).unwrap();

        pm.apply_outcome(OrderOutcome::Rejected {
            reason: "below minimum".to_string(),
        });
        assert_eq!(pm.state(), LifecycleState::Flat);
        assert!(pm.pending().is_none());
    }

    #[test]
    fn test_stop_and_target_triggers() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);

        assert_eq!(pm.exit_trigger(99.0, None), None);
        assert_eq!(pm.exit_trigger(98.5, None), Some(ExitReason::StopLoss));
        assert_eq!(pm.exit_trigger(102.5, None), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_opposing_signal_exit() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);

        let weak = signal(Direction::Short, 3, RegimeLabel::Trending);
        assert_eq!(pm.exit_trigger(100.2, Some(&weak)), None);

        let strong = signal(Direction::Short, 6, RegimeLabel::Trending);
        assert_eq!(pm.exit_trigger(100.2, Some(&strong)), Some(ExitReason::OpposingSignal));
    }

    #[test]
    fn test_trailing_scenario() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);
        assert!((pm.position().unwrap().stop_price - 98.5).abs() < 1e-9);

        pm.update_trailing(102.0);
        assert!(pm.position().unwrap().stop_price >= 100.0);

        // Dip keeps the tier earned at the high-water mark
        assert_eq!(pm.update_trailing(100.5), None);
        assert!(pm.position().unwrap().stop_price >= 100.0);
    }

    #[test]
    fn test_exit_fill_closes_position() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);
        let quantity = pm.position().unwrap().quantity;

        let intent = pm.plan_exit(ExitReason::TakeProfit, 102.5).unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.quantity, quantity);
        assert_eq!(pm.state(), LifecycleState::Closing);

        let closed = pm
            .apply_outcome(OrderOutcome::Filled(fill_for(&intent, 102.5)))
            .unwrap();
        assert_eq!(closed.exit_reason, ExitReason::TakeProfit);
        assert!((closed.realized_pnl - quantity * 2.5).abs() < 1e-6);
        assert_eq!(pm.state(), LifecycleState::Flat);
        assert_eq!(pm.stats().trades, 1);
        assert_eq!(pm.stats().wins, 1);
    }

    #[test]
    fn test_rejected_exit_keeps_position_and_retries() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);
        let before = pm.position().unwrap().clone();

        pm.plan_exit(ExitReason::StopLoss, 98.0).unwrap();
        pm.apply_outcome(OrderOutcome::Rejected {
            reason: "venue busy".to_string(),
        });

        let pos = pm.position().unwrap();
        assert_eq!(pos.quantity, before.quantity);
        assert_eq!(pos.stop_price, before.stop_price);
        assert_eq!(pos.exit_request, Some(ExitReason::StopLoss));
        assert_eq!(pm.state(), LifecycleState::Open);

        // Retry even though price recovered
        assert_eq!(pm.exit_trigger(100.4, None), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_unconfirmed_exit_is_not_resubmitted() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);

        let intent = pm.plan_exit(ExitReason::StopLoss, 98.0).unwrap();
        pm.apply_outcome(OrderOutcome::Unconfirmed);

        assert_eq!(pm.state(), LifecycleState::Closing);
        assert!(pm.plan_exit(ExitReason::StopLoss, 97.0).is_none());

        // Status query finds the fill, reported twice
        let fill = fill_for(&intent, 98.0);
        assert!(pm.apply_status(OrderStatus::Filled(fill.clone())).is_some());
        assert!(pm.apply_status(OrderStatus::Filled(fill)).is_none());
        assert_eq!(pm.stats().trades, 1);
        assert_eq!(pm.state(), LifecycleState::Flat);
    }

    #[test]
    fn test_not_found_exit_is_retried() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);

        pm.plan_exit(ExitReason::TakeProfit, 102.5).unwrap();
        pm.apply_outcome(OrderOutcome::Unconfirmed);
        pm.apply_status(OrderStatus::NotFound);

        assert!(pm.pending().is_none());
        assert_eq!(pm.position().unwrap().exit_request, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_partial_exit_fill() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);
        let quantity = pm.position().unwrap().quantity;

        let intent = pm.plan_exit(ExitReason::TakeProfit, 103.0).unwrap();
        let mut partial = fill_for(&intent, 103.0);
        partial.quantity = quantity / 2.0;
        assert!(pm.apply_outcome(OrderOutcome::Filled(partial)).is_none());

        let pos = pm.position().unwrap();
        assert!((pos.quantity - quantity / 2.0).abs() < 1e-9);
        assert_eq!(pos.exit_request, Some(ExitReason::TakeProfit));

        let retry = pm.plan_exit(ExitReason::TakeProfit, 103.0).unwrap();
        assert!((retry.quantity - quantity / 2.0).abs() < 1e-9);
        let closed = pm
            .apply_outcome(OrderOutcome::Filled(fill_for(&retry, 104.0)))
            .unwrap();

        let expected = quantity / 2.0 * 3.0 + quantity / 2.0 * 4.0;
        assert!((closed.realized_pnl - expected).abs() < 1e-6);
    }

    #[test]
    fn test_fees_reduce_realized_pnl() {
        let mut pm = manager();
        let sig = signal(Direction::Long, 10, RegimeLabel::Trending);
        let intent = pm
            .plan_entry(&sig, 100.0, 10000.0, 0.0, &calculator())
            .unwrap()
            .unwrap();
        let quantity = intent.quantity;

        let mut entry = fill_for(&intent, 100.0);
        entry.fee = 100.0 * quantity * 0.001;
        pm.apply_outcome(OrderOutcome::Filled(entry));

        let pos = pm.position().unwrap();
        assert!((pos.fee_rate - 0.001).abs() < 1e-12);
        assert!((pos.profit_pct(102.5) - 2.3).abs() < 1e-9);

        let exit = pm.plan_exit(ExitReason::TakeProfit, 102.5).unwrap();
        let mut fill = fill_for(&exit, 102.5);
        fill.fee = 102.5 * quantity * 0.001;
        let closed = pm.apply_outcome(OrderOutcome::Filled(fill)).unwrap();

        let expected = quantity * 2.5 - quantity * 0.1 - quantity * 0.1025;
        assert!((closed.realized_pnl - expected).abs() < 1e-6);
        assert!((pm.stats().realized_pnl - expected).abs() < 1e-6);
    }

    #[test]
    fn test_short_lifecycle() {
        let mut pm = manager();
        let sig = signal(Direction::Short, 6, RegimeLabel::Ranging);
        let intent = pm
            .plan_entry(&sig, 200.0, 10000.0, 0.0, &calculator())
            .unwrap()
            .unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        pm.apply_outcome(OrderOutcome::Filled(fill_for(&intent, 200.0)));

        let pos = pm.position().unwrap();
        assert!((pos.stop_price - 202.0).abs() < 1e-9);
        assert!((pos.take_profit_price - 197.0).abs() < 1e-9);
        assert_eq!(pm.exit_trigger(202.0, None), Some(ExitReason::StopLoss));
        assert_eq!(pm.exit_trigger(197.0, None), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_restore_resumes_management() {
        let mut pm = manager();
        open_long(&mut pm, 100.0);
        let saved = pm.position().cloned();

        let mut resumed = manager();
        resumed.restore(saved, None);
        assert_eq!(resumed.state(), LifecycleState::Open);
        assert_eq!(resumed.exit_trigger(98.0, None), Some(ExitReason::StopLoss));
    }
}
