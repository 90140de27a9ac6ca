use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::position_manager::{PendingOrder, PositionManager, SessionStats};
use super::timeframe_state::TimeframeState;
use crate::error::EngineError;
use crate::gateway::{ExchangeGateway, MarketDataProvider, OrderIntent};
use crate::models::{Candle, ClosedPosition, ExitReason, Position, RegimeLabel, SignalResult, Timeframe};
use crate::persistence::{JsonStateStore, PersistedState};
use crate::regime::classify_regime;
use crate::risk::RiskCalculator;
use crate::settings::BotConfig;
use crate::strategy::aggregate;
use crate::Result;

/// What the engine did with the gateway this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    /// Nothing to do
    Hold,
    /// A previously submitted order is still unresolved
    AwaitingOrder,
    Entry(OrderIntent),
    Exit { reason: ExitReason, intent: OrderIntent },
}

/// Summary of one evaluation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub mark_price: Option<f64>,
    pub regime: Option<RegimeLabel>,
    pub signal: Option<SignalResult>,
    pub action: CycleAction,
    /// New trailing stop when it moved this cycle
    pub stop_moved: Option<f64>,
    pub closed: Option<ClosedPosition>,
    /// Recovered failures, for the operator
    pub errors: Vec<String>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            mark_price: None,
            regime: None,
            signal: None,
            action: CycleAction::Hold,
            stop_moved: None,
            closed: None,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, err: &EngineError) {
        self.errors.push(err.to_string());
    }
}

/// Single-instrument evaluation engine
///
/// Owns the timeframe states and the position manager. Each `run_cycle`
/// is one full pass: reconcile, fetch, classify, aggregate, act, persist.
pub struct TradingEngine<M, G> {
    config: BotConfig,
    provider: M,
    gateway: G,
    store: Option<JsonStateStore>,
    manager: PositionManager,
    calculator: RiskCalculator,
    states: BTreeMap<Timeframe, TimeframeState>,
    last_regime: RegimeLabel,
}

impl<M, G> TradingEngine<M, G>
where
    M: MarketDataProvider,
    G: ExchangeGateway,
{
    pub fn new(config: BotConfig, provider: M, gateway: G) -> Self {
        let manager = PositionManager::new(&config.symbol, config.risk.trailing_tiers.clone())
            .with_shorts(config.market.allows_short())
            .with_trend_filter(config.signal.trend_filter);
        let calculator = RiskCalculator::new(&config.risk);
        let states = Timeframe::ALL
            .iter()
            .map(|tf| (*tf, TimeframeState::new(*tf, config.candle_limit, config.retain_points)))
            .collect();

        Self {
            config,
            provider,
            gateway,
            store: None,
            manager,
            calculator,
            states,
            last_regime: RegimeLabel::Trending,
        }
    }

    pub fn with_store(mut self, store: JsonStateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn position(&self) -> Option<&Position> {
        self.manager.position()
    }

    pub fn pending(&self) -> Option<&PendingOrder> {
        self.manager.pending()
    }

    pub fn stats(&self) -> &SessionStats {
        self.manager.stats()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn provider(&self) -> &M {
        &self.provider
    }

    pub fn timeframe_state(&self, timeframe: Timeframe) -> Option<&TimeframeState> {
        self.states.get(&timeframe)
    }

    /// Load the persisted position and pending order, if any
    pub async fn restore(&mut self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(state) = store.load().await? else {
            return Ok(());
        };

        if !state.symbol.is_empty() && state.symbol != self.config.symbol {
            tracing::warn!(
                saved = %state.symbol,
                configured = %self.config.symbol,
                "State file belongs to another symbol, ignoring it"
            );
            return Ok(());
        }

        for (timeframe, voted) in state.last_voted {
            if let Some(tf_state) = self.states.get_mut(&timeframe) {
                tf_state.set_last_voted(Some(voted));
            }
        }
        self.manager.restore(state.position, state.pending);
        Ok(())
    }

    /// Persist state before the process exits
    pub async fn shutdown(&mut self) -> Result<()> {
        self.persist().await?;
        let stats = self.manager.stats();
        tracing::info!(
            trades = stats.trades,
            wins = stats.wins,
            realized_pnl = stats.realized_pnl,
            open_position = self.manager.position().is_some(),
            "Engine stopped"
        );
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let state = PersistedState {
            symbol: self.config.symbol.clone(),
            position: self.manager.position().cloned(),
            pending: self.manager.pending().cloned(),
            last_voted: self
                .states
                .iter()
                .filter_map(|(tf, state)| state.last_voted().map(|voted| (*tf, voted)))
                .collect(),
            saved_at: None,
        };
        store.save(&state).await
    }

    /// Retries are the provider's concern; a failure here abstains the timeframe
    async fn fetch_candles(&self, timeframe: Timeframe) -> Result<Vec<Candle>> {
        self.provider
            .candles(&self.config.symbol, timeframe, self.config.candle_limit)
            .await
    }

    /// Fetch all timeframes concurrently and update their states
    ///
    /// Returns the timeframes with fresh data; the rest abstain this cycle.
    async fn refresh_timeframes(&mut self, report: &mut CycleReport) -> Vec<Timeframe> {
        let (m5, m15, h1, h4) = tokio::join!(
            self.fetch_candles(Timeframe::M5),
            self.fetch_candles(Timeframe::M15),
            self.fetch_candles(Timeframe::H1),
            self.fetch_candles(Timeframe::H4),
        );

        let mut fresh = Vec::new();
        for (timeframe, fetched) in [
            (Timeframe::M5, m5),
            (Timeframe::M15, m15),
            (Timeframe::H1, h1),
            (Timeframe::H4, h4),
        ] {
            let params = self.config.kdj_params(timeframe, self.last_regime);
            let applied = fetched.and_then(|candles| match self.states.get_mut(&timeframe) {
                Some(state) => state.apply_snapshot(candles, params),
                None => Err(EngineError::data_unavailable(Some(timeframe), "no state")),
            });

            match applied {
                Ok(()) => fresh.push(timeframe),
                Err(e) => {
                    tracing::warn!(timeframe = %timeframe, error = %e, "Timeframe abstains this cycle");
                    report.record(&e);
                }
            }
        }

        fresh
    }

    /// Ask the venue what happened to an unresolved order
    ///
    /// Returns false while the order is still unresolved.
    async fn reconcile_pending(&mut self, report: &mut CycleReport) -> bool {
        let Some(order) = self.manager.pending() else {
            return true;
        };
        let client_order_id = order.client_order_id();

        match self
            .gateway
            .order_status(&self.config.symbol, client_order_id)
            .await
        {
            Ok(status) => {
                tracing::info!(%client_order_id, ?status, "Reconciled pending order");
                report.closed = self.manager.apply_status(status);
            }
            Err(e) => {
                tracing::warn!(%client_order_id, error = %e, "Order status query failed");
                report.record(&e);
            }
        }

        self.manager.pending().is_none()
    }

    async fn submit(&mut self, intent: &OrderIntent, report: &mut CycleReport) {
        match self.gateway.submit(intent).await {
            Ok(outcome) => {
                if let Some(closed) = self.manager.apply_outcome(outcome) {
                    report.closed = Some(closed);
                }
            }
            Err(e) => {
                // Transport failures are ambiguous: the order may have arrived
                tracing::warn!(
                    client_order_id = %intent.client_order_id,
                    error = %e,
                    "Submit failed, treating outcome as unconfirmed"
                );
                report.record(&e);
                self.manager.on_unconfirmed();
            }
        }
    }

    async fn consider_entry(&mut self, signal: &SignalResult, mark_price: f64, report: &mut CycleReport) {
        if signal.direction.side().is_none() || signal.confidence_score < signal.threshold {
            return;
        }

        let sizing_inputs = async {
            let equity = self.gateway.account_equity().await?;
            let min_quantity = self.gateway.min_order_quantity(&self.config.symbol).await?;
            Ok::<_, EngineError>((equity, min_quantity))
        }
        .await;
        let (equity, min_quantity) = match sizing_inputs {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read account state, skipping entry");
                report.record(&e);
                return;
            }
        };

        match self
            .manager
            .plan_entry(signal, mark_price, equity, min_quantity, &self.calculator)
        {
            Ok(Some(intent)) => {
                tracing::info!(
                    side = ?intent.side,
                    quantity = intent.quantity,
                    price = mark_price,
                    score = signal.score,
                    "Submitting entry order"
                );
                self.submit(&intent, report).await;
                report.action = CycleAction::Entry(intent);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    direction = ?signal.direction,
                    confidence = signal.confidence_score,
                    equity,
                    error = %e,
                    "Entry aborted"
                );
                report.record(&e);
            }
        }
    }

    async fn manage_position(&mut self, signal: &SignalResult, mark_price: f64, report: &mut CycleReport) {
        report.stop_moved = self.manager.update_trailing(mark_price);

        let Some(reason) = self.manager.exit_trigger(mark_price, Some(signal)) else {
            return;
        };
        let Some(intent) = self.manager.plan_exit(reason, mark_price) else {
            return;
        };

        tracing::info!(
            reason = ?reason,
            quantity = intent.quantity,
            price = mark_price,
            "Submitting exit order"
        );
        self.submit(&intent, report).await;
        report.action = CycleAction::Exit { reason, intent };
    }

    /// One full evaluation pass
    ///
    /// Data and order failures are recovered and listed in the report. Only a
    /// failure to persist state is returned as an error.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::new();

        if !self.reconcile_pending(&mut report).await {
            report.action = CycleAction::AwaitingOrder;
            self.persist().await?;
            return Ok(report);
        }

        let symbol = self.config.symbol.clone();
        let mark_price = match self.provider.mark_price(&symbol).await {
            Ok(price) => price,
            Err(e) => {
                tracing::error!(error = %e, "No mark price, skipping cycle");
                report.record(&e);
                self.persist().await?;
                return Ok(report);
            }
        };
        report.mark_price = Some(mark_price);

        let fresh = self.refresh_timeframes(&mut report).await;

        let primary: Vec<Candle> = self
            .states
            .get(&Timeframe::PRIMARY)
            .map(|s| s.candles())
            .unwrap_or_default();
        let regime = classify_regime(&primary, &self.config.regime);
        if regime != self.last_regime {
            tracing::info!(from = %self.last_regime, to = %regime, "Market regime changed");
        }
        self.last_regime = regime;
        report.regime = Some(regime);

        // A cross between two closed candles counts on the first cycle that sees it
        let mut readings = BTreeMap::new();
        for timeframe in &fresh {
            if let Some(reading) = self
                .states
                .get_mut(timeframe)
                .and_then(|s| s.take_vote_reading())
            {
                readings.insert(*timeframe, reading);
            }
        }
        let signal = aggregate(&readings, regime, &self.config.signal);

        tracing::info!(
            %symbol,
            price = mark_price,
            %regime,
            direction = ?signal.direction,
            score = signal.score,
            threshold = signal.threshold,
            abstained = ?signal.abstained,
            "Cycle evaluated"
        );

        if self.manager.position().is_some() {
            self.manage_position(&signal, mark_price, &mut report).await;
        } else {
            self.consider_entry(&signal, mark_price, &mut report).await;
        }

        report.signal = Some(signal);
        self.persist().await?;
        Ok(report)
    }
}
