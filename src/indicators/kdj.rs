/// KDJ stochastic oscillator
///
/// RSV (raw stochastic value) measures where the close sits inside the
/// high/low range of the last `k_period` candles:
/// - RSV = 100 * (close - lowest low) / (highest high - lowest low)
/// - RSV = 50 when the range is flat
///
/// K smooths RSV and D smooths K, each with an exponential moving average of
/// span n (weight 2 / (n + 1) on the newest value). Warm-up candles count as
/// RSV = 50, so both averages start from 50. J = 3K - 2D and is allowed to
/// leave [0, 100].
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::{Candle, OscillatorPoint, RegimeLabel, Timeframe, TrendBias};

const SEED: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdjParams {
    pub k_period: usize,
    pub k_smooth: usize,
    pub d_smooth: usize,
}

impl KdjParams {
    pub const fn new(k_period: usize, k_smooth: usize, d_smooth: usize) -> Self {
        Self {
            k_period,
            k_smooth,
            d_smooth,
        }
    }

    /// Default parameters: longer periods on higher timeframes
    pub fn default_for(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::H4 => Self::new(21, 5, 5),
            Timeframe::H1 => Self::new(14, 3, 3),
            Timeframe::M15 => Self::new(9, 3, 3),
            Timeframe::M5 => Self::new(7, 3, 3),
        }
    }

    /// Regime-tuned parameters. Ranging markets get shorter periods to catch
    /// more turns; trending markets keep the defaults to reduce noise.
    pub fn preset(regime: RegimeLabel, timeframe: Timeframe) -> Self {
        match regime {
            RegimeLabel::Trending => Self::default_for(timeframe),
            RegimeLabel::Ranging => match timeframe {
                Timeframe::H4 => Self::new(14, 3, 3),
                Timeframe::H1 => Self::new(9, 3, 3),
                Timeframe::M15 => Self::new(7, 2, 2),
                Timeframe::M5 => Self::new(5, 2, 2),
            },
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(3..=50).contains(&self.k_period) {
            return Err(EngineError::Config(format!(
                "K period {} out of range 3..=50",
                self.k_period
            )));
        }
        if !(1..=10).contains(&self.k_smooth) || !(1..=10).contains(&self.d_smooth) {
            return Err(EngineError::Config(format!(
                "smoothing K={} D={} out of range 1..=10",
                self.k_smooth, self.d_smooth
            )));
        }
        Ok(())
    }
}

/// Calculate the K/D/J series for the given candles
///
/// Returns one point per candle from index `k_period - 1` onwards, so the
/// output length is `candles.len() - (k_period - 1)`. Warm-up candles produce
/// nothing. Returns an empty series when there is not enough data.
pub fn compute_oscillator(candles: &[Candle], params: KdjParams) -> Vec<OscillatorPoint> {
    let KdjParams {
        k_period,
        k_smooth,
        d_smooth,
    } = params;

    if k_period == 0 || k_smooth == 0 || d_smooth == 0 || candles.len() < k_period {
        return Vec::new();
    }

    let k_alpha = ema_weight(k_smooth);
    let d_alpha = ema_weight(d_smooth);

    let mut points = Vec::with_capacity(candles.len() - (k_period - 1));
    // Warm-up rows hold RSV at 50, which leaves both averages at the seed
    let mut k = SEED;
    let mut d = SEED;

    for i in (k_period - 1)..candles.len() {
        let window = &candles[i + 1 - k_period..=i];
        let lowest = window.iter().fold(f64::INFINITY, |acc, c| acc.min(c.low));
        let highest = window.iter().fold(f64::NEG_INFINITY, |acc, c| acc.max(c.high));

        let range = highest - lowest;
        let rsv = if range == 0.0 {
            50.0
        } else {
            100.0 * (candles[i].close - lowest) / range
        };

        k += k_alpha * (rsv - k);
        d += d_alpha * (k - d);
        let j = 3.0 * k - 2.0 * d;

        points.push(OscillatorPoint {
            k,
            d,
            j,
            timestamp: candles[i].open_time,
        });
    }

    points
}

/// EMA weight for a span of `n` periods
fn ema_weight(n: usize) -> f64 {
    2.0 / (n as f64 + 1.0)
}

impl TrendBias {
    /// Bullish when K and D both sit above 50, bearish when both sit below
    pub fn of(point: &OscillatorPoint) -> Self {
        if point.k > 50.0 && point.d > 50.0 {
            TrendBias::Bullish
        } else if point.k < 50.0 && point.d < 50.0 {
            TrendBias::Bearish
        } else {
            TrendBias::Neutral
        }
    }
}
