use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Candle width the engine evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4];

    /// Timeframe the regime is classified on
    pub const PRIMARY: Timeframe = Timeframe::H4;

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    /// Width of one candle
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV candlestick, immutable once closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: DateTime<Utc>,
}

/// One K/D/J reading. J is unbounded and may leave [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorPoint {
    pub k: f64,
    pub d: f64,
    pub j: f64,
    pub timestamp: DateTime<Utc>,
}

/// Stop/target offsets in percent of the entry price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBands {
    pub stop_pct: f64,
    pub take_profit_pct: f64,
}

/// Market regime of the primary timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeLabel {
    Trending,
    Ranging,
}

impl RegimeLabel {
    /// Minimum |score| for a non-Flat direction.
    /// Ranging demands more agreement to filter chop.
    pub fn signal_threshold(&self) -> u32 {
        match self {
            RegimeLabel::Trending => 4,
            RegimeLabel::Ranging => 6,
        }
    }

    /// Wider targets than stops in trends, a tight band when ranging
    pub fn risk_bands(&self) -> RiskBands {
        match self {
            RegimeLabel::Trending => RiskBands {
                stop_pct: 1.5,
                take_profit_pct: 2.5,
            },
            RegimeLabel::Ranging => RiskBands {
                stop_pct: 1.0,
                take_profit_pct: 1.5,
            },
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeLabel::Trending => f.write_str("TRENDING"),
            RegimeLabel::Ranging => f.write_str("RANGING"),
        }
    }
}

/// Aggregated signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::Flat => None,
        }
    }
}

/// Side of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn direction(&self) -> Direction {
        match self {
            Side::Long => Direction::Long,
            Side::Short => Direction::Short,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// General lean of a timeframe's K and D lines around the midline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

/// Output of one aggregation cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SignalResult {
    pub direction: Direction,
    pub confidence_score: u32,
    /// Signed weighted score
    pub score: i32,
    pub threshold: u32,
    pub regime: RegimeLabel,
    pub contributing: BTreeSet<Timeframe>,
    pub votes: BTreeMap<Timeframe, i32>,
    /// Timeframes with no usable data this cycle
    pub abstained: BTreeSet<Timeframe>,
    pub trend: BTreeMap<Timeframe, TrendBias>,
}

impl SignalResult {
    /// True when this signal points against `side` with enough conviction
    pub fn opposes(&self, side: Side) -> bool {
        self.direction == side.opposite().direction() && self.confidence_score >= self.threshold
    }
}

/// Why a position was (or is being) closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    OpposingSignal,
    Manual,
}

/// The single active position for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    /// Best unrealized profit seen so far, in percent
    pub high_water_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub regime: RegimeLabel,
    /// Set when an exit attempt failed and must be retried
    #[serde(default)]
    pub exit_request: Option<ExitReason>,
    /// Profit already booked, net of fees: the entry commission plus any
    /// partial exit fills
    #[serde(default)]
    pub realized_pnl: f64,
    /// Commission rate charged on each side of the trade
    #[serde(default)]
    pub fee_rate: f64,
}

impl Position {
    /// Unrealized profit in percent of entry after entry and exit fees,
    /// positive when the position is winning
    pub fn profit_pct(&self, mark: f64) -> f64 {
        let gross = match self.side {
            Side::Long => (mark - self.entry_price) / self.entry_price * 100.0,
            Side::Short => (self.entry_price - mark) / self.entry_price * 100.0,
        };
        gross - self.fee_rate * 2.0 * 100.0
    }

    pub fn pnl(&self, price: f64, quantity: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * quantity,
            Side::Short => (self.entry_price - price) * quantity,
        }
    }
}

/// A position after its exit fill, handed to reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
}
