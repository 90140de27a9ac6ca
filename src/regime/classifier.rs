/// Market Regime Classifier using Bollinger Band width + realized volatility
///
/// Classifies the primary timeframe as:
/// - Trending: the latest band width AND the latest return volatility both rank in
///   the top `trending_fraction` of readings across the candle window
/// - Ranging: otherwise
///
/// Stateless: everything is recomputed from the candles on each call.
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::indicators::{band_width_series, return_volatility_series};
use crate::models::{Candle, RegimeLabel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Rolling window for band width and volatility
    pub window: usize,
    /// Band distance from the middle in standard deviations
    pub num_std: f64,
    /// Share of readings counted as "high" (0.4 = top 40%)
    pub trending_fraction: f64,
    /// Fewer readings than this falls back to Trending
    pub min_readings: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: 20,
            num_std: 2.0,
            trending_fraction: 0.4,
            min_readings: 5,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window < 2 {
            return Err(EngineError::Config(format!(
                "regime window must be at least 2, got {}",
                self.window
            )));
        }
        if !(self.trending_fraction > 0.0 && self.trending_fraction <= 1.0) {
            return Err(EngineError::Config(format!(
                "trending_fraction must be in (0, 1], got {}",
                self.trending_fraction
            )));
        }
        Ok(())
    }
}

/// Fraction of the other readings strictly below the latest one (0.0 ..= 1.0)
fn latest_rank(readings: &[f64]) -> Option<f64> {
    let (latest, history) = readings.split_last()?;
    if history.is_empty() {
        return None;
    }
    let below = history.iter().filter(|r| *r < latest).count();
    Some(below as f64 / history.len() as f64)
}

/// Detect the current regime from the candle window
pub fn classify_regime(candles: &[Candle], config: &RegimeConfig) -> RegimeLabel {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let widths = band_width_series(&closes, config.window, config.num_std);
    let volatility = return_volatility_series(&closes, config.window);

    let min_readings = config.min_readings.max(2);
    if widths.len() < min_readings || volatility.len() < min_readings {
        tracing::warn!(
            candles = candles.len(),
            "Not enough data to determine market regime, defaulting to TRENDING"
        );
        return RegimeLabel::Trending;
    }

    let (Some(width_rank), Some(vol_rank)) = (latest_rank(&widths), latest_rank(&volatility))
    else {
        return RegimeLabel::Trending;
    };

    let cutoff = 1.0 - config.trending_fraction;
    let regime = if width_rank >= cutoff && vol_rank >= cutoff {
        RegimeLabel::Trending
    } else {
        RegimeLabel::Ranging
    };

    tracing::debug!(
        %regime,
        width_rank,
        vol_rank,
        band_width = widths.last().copied().unwrap_or_default(),
        "Classified market regime"
    );

    regime
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 1000.0,
                open_time: start + Duration::hours(4 * i as i64),
            })
            .collect()
    }

    /// Quiet oscillation followed by a strong, accelerating breakout
    fn breakout_closes() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..50)
            .map(|i| 100.0 + if i % 2 == 0 { 0.2 } else { -0.2 })
            .collect();
        let mut price = 100.0;
        for i in 0..10 {
            price *= 1.0 + 0.01 * (i as f64 + 1.0);
            closes.push(price);
        }
        closes
    }

    /// Wide early swings that calm down into a tight range
    fn calming_closes() -> Vec<f64> {
        (0..60)
            .map(|i| {
                let amplitude = 6.0 * (1.0 - i as f64 / 60.0) + 0.05;
                100.0 + if i % 2 == 0 { amplitude } else { -amplitude }
            })
            .collect()
    }

    #[test]
    fn test_detect_trending_breakout() {
        let candles = create_test_candles(&breakout_closes());
        let regime = classify_regime(&candles, &RegimeConfig::default());
        assert_eq!(regime, RegimeLabel::Trending);
    }

    #[test]
    fn test_detect_ranging_when_calm() {
        let candles = create_test_candles(&calming_closes());
        let regime = classify_regime(&candles, &RegimeConfig::default());
        assert_eq!(regime, RegimeLabel::Ranging);
    }

    #[test]
    fn test_flat_market_is_ranging() {
        let candles = create_test_candles(&[100.0; 40]);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            RegimeLabel::Ranging
        );
    }

    #[test]
    fn test_deterministic() {
        let candles = create_test_candles(&breakout_closes());
        let config = RegimeConfig::default();
        let first = classify_regime(&candles, &config);
        for _ in 0..5 {
            assert_eq!(classify_regime(&candles, &config), first);
        }

        let calm = create_test_candles(&calming_closes());
        assert_eq!(classify_regime(&calm, &config), classify_regime(&calm, &config));
    }

    #[test]
    fn test_insufficient_data_defaults_to_trending() {
        let candles = create_test_candles(&[100.0, 101.0, 99.0]);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            RegimeLabel::Trending
        );
    }

    #[test]
    fn test_latest_rank() {
        assert_eq!(latest_rank(&[1.0, 2.0, 3.0, 4.0]), Some(1.0));
        assert_eq!(latest_rank(&[4.0, 3.0, 2.0, 1.0]), Some(0.0));
        assert_eq!(latest_rank(&[1.0]), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(RegimeConfig::default().validate().is_ok());
        let bad = RegimeConfig {
            trending_fraction: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
