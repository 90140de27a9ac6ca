// Collaborator seams: market data in, order intents out
pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Candle, Side, Timeframe};
use crate::Result;

pub use paper::PaperGateway;

/// Supplies candles and mark prices on demand
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// The most recent `limit` closed candles, oldest first, gap-free.
    /// Fails with `DataUnavailable` when the venue cannot supply them.
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;

    /// Latest mark price
    async fn mark_price(&self, symbol: &str) -> Result<f64>;
}

/// Accepts order intents and reports their fate
///
/// `submit` must distinguish a confirmed fill, an explicit rejection and an
/// ambiguous outcome. After an ambiguous outcome the caller asks
/// `order_status` with the same client order id instead of resubmitting.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderOutcome>;

    async fn order_status(&self, symbol: &str, client_order_id: Uuid) -> Result<OrderStatus>;

    /// Smallest order quantity the venue accepts for `symbol`
    async fn min_order_quantity(&self, symbol: &str) -> Result<f64>;

    /// Equity available for sizing, in quote currency
    async fn account_equity(&self) -> Result<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Order side that opens a position on `side`
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position on `side`
    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// An order the core wants executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Idempotency key, reused when querying after an ambiguous submit
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    /// Limit price, None for market orders
    pub price: Option<f64>,
    /// Mark price when the intent was created
    pub reference_price: f64,
}

impl OrderIntent {
    pub fn market(symbol: &str, side: OrderSide, quantity: f64, reference_price: f64) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            reference_price,
        }
    }
}

/// Confirmed execution. Price and quantity may differ from the intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub client_order_id: Uuid,
    pub price: f64,
    pub quantity: f64,
    /// Commission charged for this fill, in quote currency
    #[serde(default)]
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

/// Immediate result of a submit
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled(Fill),
    Rejected { reason: String },
    /// Sent, but the venue's answer was lost or ambiguous
    Unconfirmed,
}

/// Venue-side state of a previously submitted order
#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Filled(Fill),
    Rejected { reason: String },
    /// Accepted and still working
    Working,
    /// The venue never saw this order
    NotFound,
}
