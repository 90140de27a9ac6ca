use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{ExchangeGateway, Fill, OrderIntent, OrderOutcome, OrderSide, OrderStatus};
use crate::error::EngineError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_equity: f64,
    pub min_order_quantity: f64,
    /// Adverse fill slippage in basis points
    pub slippage_bps: f64,
    /// Commission per fill as a share of notional. Unset means the market's
    /// standard rate, resolved by `BotConfig::paper_config`; a gateway built
    /// from an unresolved config charges nothing.
    pub fee_rate: Option<f64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_equity: 10000.0,
            min_order_quantity: 0.0001,
            slippage_bps: 0.0,
            fee_rate: None,
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    realized_pnl: f64,
    /// Signed: positive long, negative short
    net_quantity: f64,
    avg_price: f64,
    orders: HashMap<Uuid, OrderStatus>,
}

impl PaperBook {
    fn apply_fill(&mut self, side: OrderSide, price: f64, quantity: f64, fee: f64) {
        self.realized_pnl -= fee;
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        if self.net_quantity == 0.0 || self.net_quantity.signum() == signed.signum() {
            let held = self.net_quantity.abs();
            self.avg_price = (self.avg_price * held + price * quantity) / (held + quantity);
            self.net_quantity += signed;
            return;
        }

        let closed = quantity.min(self.net_quantity.abs());
        self.realized_pnl += closed * (price - self.avg_price) * self.net_quantity.signum();

        let before = self.net_quantity;
        self.net_quantity += signed;
        if self.net_quantity.abs() < f64::EPSILON {
            self.net_quantity = 0.0;
            self.avg_price = 0.0;
        } else if self.net_quantity.signum() != before.signum() {
            self.avg_price = price;
        }
    }
}

/// In-memory venue that fills every valid market order at the reference price
///
/// Resubmitting a known client order id returns the recorded result instead of
/// filling twice.
pub struct PaperGateway {
    config: PaperConfig,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            config,
            book: Mutex::new(PaperBook::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>> {
        self.book
            .lock()
            .map_err(|e| EngineError::Gateway(e.to_string()))
    }

    pub fn fee_rate(&self) -> f64 {
        self.config.fee_rate.unwrap_or(0.0)
    }

    /// Signed net position held at the paper venue
    pub fn net_quantity(&self) -> Result<f64> {
        Ok(self.lock()?.net_quantity)
    }

    fn fill_price(&self, intent: &OrderIntent) -> f64 {
        let base = intent.price.unwrap_or(intent.reference_price);
        let slip = self.config.slippage_bps / 10_000.0;
        match intent.side {
            OrderSide::Buy => base * (1.0 + slip),
            OrderSide::Sell => base * (1.0 - slip),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome> {
        let mut book = self.lock()?;

        if let Some(status) = book.orders.get(&intent.client_order_id) {
            tracing::warn!(
                client_order_id = %intent.client_order_id,
                "Duplicate paper order submission, returning recorded result"
            );
            return Ok(match status.clone() {
                OrderStatus::Filled(fill) => OrderOutcome::Filled(fill),
                OrderStatus::Rejected { reason } => OrderOutcome::Rejected { reason },
                OrderStatus::Working | OrderStatus::NotFound => OrderOutcome::Unconfirmed,
            });
        }

        if intent.quantity < self.config.min_order_quantity || intent.quantity <= 0.0 {
            let reason = format!(
                "quantity {:.8} below minimum {:.8}",
                intent.quantity, self.config.min_order_quantity
            );
            book.orders.insert(
                intent.client_order_id,
                OrderStatus::Rejected {
                    reason: reason.clone(),
                },
            );
            return Ok(OrderOutcome::Rejected { reason });
        }

        let price = self.fill_price(intent);
        let fill = Fill {
            client_order_id: intent.client_order_id,
            price,
            quantity: intent.quantity,
            fee: price * intent.quantity * self.fee_rate(),
            filled_at: Utc::now(),
        };
        book.apply_fill(intent.side, fill.price, fill.quantity, fill.fee);
        book.orders
            .insert(intent.client_order_id, OrderStatus::Filled(fill.clone()));

        tracing::info!(
            symbol = %intent.symbol,
            side = ?intent.side,
            quantity = fill.quantity,
            price = fill.price,
            fee = fill.fee,
            "Paper order filled"
        );

        Ok(OrderOutcome::Filled(fill))
    }

    async fn order_status(&self, _symbol: &str, client_order_id: Uuid) -> Result<OrderStatus> {
        Ok(self
            .lock()?
            .orders
            .get(&client_order_id)
            .cloned()
            .unwrap_or(OrderStatus::NotFound))
    }

    async fn min_order_quantity(&self, _symbol: &str) -> Result<f64> {
        Ok(self.config.min_order_quantity)
    }

    async fn account_equity(&self) -> Result<f64> {
        Ok(self.config.initial_equity + self.lock()?.realized_pnl)
    }
}
