/// Multi-timeframe KDJ signal aggregation
///
/// Each timeframe casts a vote from its latest two oscillator points:
/// - +1 on a golden cross (K crosses above D) or J rising out of oversold
/// - -1 on a death cross (K crosses below D) or J falling out of overbought
/// - 0 otherwise, or when bullish and bearish conditions coincide
///
/// The weighted sum is compared against the regime threshold.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::EngineError;
use crate::models::{Direction, OscillatorPoint, RegimeLabel, SignalResult, Timeframe, TrendBias};

/// Largest accepted timeframe weight
pub const MAX_WEIGHT: u32 = 1000;

/// Latest oscillator point and its predecessor for one timeframe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeframeReading {
    pub previous: OscillatorPoint,
    pub current: OscillatorPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub weights: BTreeMap<Timeframe, u32>,
    pub oversold: f64,
    pub overbought: f64,
    /// Veto entries against the higher-timeframe trend
    pub trend_filter: bool,
    /// Switch to the regime KDJ presets each cycle
    pub adapt_kdj_to_regime: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::from([
                (Timeframe::H4, 4),
                (Timeframe::H1, 3),
                (Timeframe::M15, 2),
                (Timeframe::M5, 1),
            ]),
            oversold: 20.0,
            overbought: 80.0,
            trend_filter: true,
            adapt_kdj_to_regime: false,
        }
    }
}

impl SignalConfig {
    pub fn weight(&self, timeframe: Timeframe) -> u32 {
        self.weights.get(&timeframe).copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some((timeframe, weight)) = self.weights.iter().find(|(_, w)| **w > MAX_WEIGHT) {
            return Err(EngineError::Config(format!(
                "weight {} for {} exceeds {}",
                weight, timeframe, MAX_WEIGHT
            )));
        }
        if self.oversold >= self.overbought {
            return Err(EngineError::Config(format!(
                "oversold ({}) must be below overbought ({})",
                self.oversold, self.overbought
            )));
        }
        Ok(())
    }
}

/// K crosses strictly above D between the two points
pub fn is_golden_cross(reading: &TimeframeReading) -> bool {
    reading.previous.k <= reading.previous.d && reading.current.k > reading.current.d
}

/// K crosses strictly below D between the two points
pub fn is_death_cross(reading: &TimeframeReading) -> bool {
    reading.previous.k >= reading.previous.d && reading.current.k < reading.current.d
}

/// Signed vote of a single timeframe
pub fn vote(reading: &TimeframeReading, config: &SignalConfig) -> i32 {
    let TimeframeReading { previous, current } = reading;

    let j_rising_from_oversold = previous.j < config.oversold && current.j > previous.j;
    let j_falling_from_overbought = previous.j > config.overbought && current.j < previous.j;

    let bullish = is_golden_cross(reading) || j_rising_from_oversold;
    let bearish = is_death_cross(reading) || j_falling_from_overbought;

    match (bullish, bearish) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

/// Combine per-timeframe readings into one weighted signal
///
/// Timeframes missing from `readings` abstain: no vote, no weight. They are
/// listed in `abstained` so callers can report partial data.
pub fn aggregate(
    readings: &BTreeMap<Timeframe, TimeframeReading>,
    regime: RegimeLabel,
    config: &SignalConfig,
) -> SignalResult {
    let mut votes = BTreeMap::new();
    let mut trend = BTreeMap::new();
    let mut abstained = BTreeSet::new();
    let mut score: i32 = 0;

    for timeframe in Timeframe::ALL {
        match readings.get(&timeframe) {
            Some(reading) => {
                let v = vote(reading, config);
                let weight = i32::try_from(config.weight(timeframe)).unwrap_or(i32::MAX);
                score = score.saturating_add(v.saturating_mul(weight));
                votes.insert(timeframe, v);
                trend.insert(timeframe, TrendBias::of(&reading.current));
            }
            None => {
                abstained.insert(timeframe);
            }
        }
    }

    let threshold = regime.signal_threshold();
    let bar = i32::try_from(threshold).unwrap_or(i32::MAX);
    let direction = if score >= bar {
        Direction::Long
    } else if score <= -bar {
        Direction::Short
    } else {
        Direction::Flat
    };

    let contributing = match direction {
        Direction::Flat => BTreeSet::new(),
        _ => votes
            .iter()
            .filter(|(_, v)| **v == direction.sign())
            .map(|(tf, _)| *tf)
            .collect(),
    };

    SignalResult {
        direction,
        confidence_score: score.unsigned_abs(),
        score,
        threshold,
        regime,
        contributing,
        votes,
        abstained,
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn point(k: f64, d: f64) -> OscillatorPoint {
        OscillatorPoint {
            k,
            d,
            j: 3.0 * k - 2.0 * d,
            timestamp: Utc::now(),
        }
    }

    fn reading(prev: (f64, f64), curr: (f64, f64)) -> TimeframeReading {
        TimeframeReading {
            previous: point(prev.0, prev.1),
            current: point(curr.0, curr.1),
        }
    }

    fn golden() -> TimeframeReading {
        reading((45.0, 50.0), (55.0, 50.0))
    }

    fn death() -> TimeframeReading {
        reading((55.0, 50.0), (45.0, 50.0))
    }

    fn quiet() -> TimeframeReading {
        reading((52.0, 50.0), (53.0, 50.0))
    }

    #[test]
    fn test_golden_and_death_cross() {
        let config = SignalConfig::default();
        assert!(is_golden_cross(&golden()));
        assert_eq!(vote(&golden(), &config), 1);
        assert!(is_death_cross(&death()));
        assert_eq!(vote(&death(), &config), -1);
        assert_eq!(vote(&quiet(), &config), 0);
    }

    #[test]
    fn test_equality_is_not_a_cross() {
        let config = SignalConfig::default();
        // K touches D but does not pass it
        let touch = reading((45.0, 50.0), (50.0, 50.0));
        assert!(!is_golden_cross(&touch));
        assert!(!is_death_cross(&touch));
        assert_eq!(vote(&touch, &config), 0);

        // Equal on both points
        let flat = reading((50.0, 50.0), (50.0, 50.0));
        assert!(!is_golden_cross(&flat));
        assert!(!is_death_cross(&flat));
    }

    #[test]
    fn test_j_rising_out_of_oversold_votes_bullish() {
        let config = SignalConfig::default();
        // K stays below D, J goes 10 -> 16
        let r = TimeframeReading {
            previous: OscillatorPoint { k: 15.0, d: 17.5, j: 10.0, timestamp: Utc::now() },
            current: OscillatorPoint { k: 16.0, d: 16.5, j: 16.0, timestamp: Utc::now() },
        };
        assert_eq!(vote(&r, &config), 1);
    }

    #[test]
    fn test_j_falling_out_of_overbought_votes_bearish() {
        let config = SignalConfig::default();
        let r = TimeframeReading {
            previous: OscillatorPoint { k: 85.0, d: 82.5, j: 90.0, timestamp: Utc::now() },
            current: OscillatorPoint { k: 84.0, d: 83.5, j: 85.0, timestamp: Utc::now() },
        };
        assert_eq!(vote(&r, &config), -1);
    }

    #[test]
    fn test_scenario_all_timeframes_bullish_in_trend() {
        let readings: BTreeMap<_, _> = Timeframe::ALL.iter().map(|tf| (*tf, golden())).collect();

        let signal = aggregate(&readings, RegimeLabel::Trending, &SignalConfig::default());

        assert_eq!(signal.score, 10);
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.confidence_score, 10);
        assert_eq!(signal.contributing.len(), 4);
        assert!(signal.abstained.is_empty());
    }

    #[test]
    fn test_scenario_low_timeframes_only_in_range() {
        let readings = BTreeMap::from([
            (Timeframe::H4, quiet()),
            (Timeframe::H1, quiet()),
            (Timeframe::M15, golden()),
            (Timeframe::M5, golden()),
        ]);

        let signal = aggregate(&readings, RegimeLabel::Ranging, &SignalConfig::default());

        assert_eq!(signal.score, 3);
        assert_eq!(signal.threshold, 6);
        assert_eq!(signal.direction, Direction::Flat);
        assert!(signal.contributing.is_empty());
    }

    #[test]
    fn test_threshold_depends_on_regime() {
        // 4h alone scores 4
        let readings = BTreeMap::from([
            (Timeframe::H4, golden()),
            (Timeframe::H1, quiet()),
            (Timeframe::M15, quiet()),
            (Timeframe::M5, quiet()),
        ]);
        let config = SignalConfig::default();

        assert_eq!(aggregate(&readings, RegimeLabel::Trending, &config).direction, Direction::Long);
        assert_eq!(aggregate(&readings, RegimeLabel::Ranging, &config).direction, Direction::Flat);

        // 4h + 15m = 6 passes the ranging bar
        let mut readings = readings;
        readings.insert(Timeframe::M15, golden());
        assert_eq!(aggregate(&readings, RegimeLabel::Ranging, &config).direction, Direction::Long);
    }

    #[test]
    fn test_short_signal_and_contributors() {
        let readings = BTreeMap::from([
            (Timeframe::H4, death()),
            (Timeframe::H1, death()),
            (Timeframe::M15, golden()),
            (Timeframe::M5, quiet()),
        ]);

        let signal = aggregate(&readings, RegimeLabel::Trending, &SignalConfig::default());

        assert_eq!(signal.score, -5);
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.confidence_score, 5);
        assert_eq!(
            signal.contributing,
            BTreeSet::from([Timeframe::H4, Timeframe::H1])
        );
    }

    #[test]
    fn test_missing_timeframe_abstains() {
        let readings = BTreeMap::from([
            (Timeframe::H1, golden()),
            (Timeframe::M15, golden()),
            (Timeframe::M5, golden()),
        ]);

        let signal = aggregate(&readings, RegimeLabel::Trending, &SignalConfig::default());

        assert_eq!(signal.score, 6);
        assert_eq!(signal.abstained, BTreeSet::from([Timeframe::H4]));
        assert!(!signal.votes.contains_key(&Timeframe::H4));
    }

    #[test]
    fn test_threshold_property_over_scores() {
        // Every subset of voting timeframes, both signs
        let config = SignalConfig::default();
        for mask in 0u8..16 {
            for bullish in [true, false] {
                let readings: BTreeMap<_, _> = Timeframe::ALL
                    .iter()
                    .enumerate()
                    .map(|(i, tf)| {
                        let r = if mask & (1 << i) == 0 {
                            quiet()
                        } else if bullish {
                            golden()
                        } else {
                            death()
                        };
                        (*tf, r)
                    })
                    .collect();

                for regime in [RegimeLabel::Trending, RegimeLabel::Ranging] {
                    let signal = aggregate(&readings, regime, &config);
                    let passes = signal.confidence_score >= regime.signal_threshold();
                    assert_eq!(signal.direction != Direction::Flat, passes);
                }
            }
        }
    }

    #[test]
    fn test_oversized_weight_rejected() {
        let mut config = SignalConfig::default();
        config.weights.insert(Timeframe::H4, MAX_WEIGHT + 1);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        config.weights.insert(Timeframe::H4, MAX_WEIGHT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_weight_saturates_instead_of_wrapping() {
        let mut config = SignalConfig::default();
        config.weights.insert(Timeframe::H4, u32::MAX);
        config.weights.insert(Timeframe::H1, u32::MAX);
        let readings = BTreeMap::from([(Timeframe::H4, golden()), (Timeframe::H1, golden())]);

        let signal = aggregate(&readings, RegimeLabel::Trending, &config);
        assert_eq!(signal.score, i32::MAX);
        assert_eq!(signal.direction, Direction::Long);
    }

    fn any_reading() -> impl Strategy<Value = Option<TimeframeReading>> {
        prop_oneof![
            Just(None),
            Just(Some(golden())),
            Just(Some(death())),
            Just(Some(quiet())),
        ]
    }

    proptest! {
        #[test]
        fn prop_direction_matches_weighted_score(
            picks in prop::collection::vec(any_reading(), 4),
            weights in prop::collection::vec(0u32..=MAX_WEIGHT, 4),
            ranging in any::<bool>(),
        ) {
            let regime = if ranging { RegimeLabel::Ranging } else { RegimeLabel::Trending };
            let mut config = SignalConfig::default();
            let mut readings = BTreeMap::new();
            let mut expected = 0i32;
            for (i, tf) in Timeframe::ALL.iter().enumerate() {
                config.weights.insert(*tf, weights[i]);
                if let Some(r) = picks[i] {
                    readings.insert(*tf, r);
                    expected += vote(&r, &config) * weights[i] as i32;
                }
            }

            let signal = aggregate(&readings, regime, &config);

            prop_assert_eq!(signal.score, expected);
            prop_assert_eq!(signal.confidence_score, expected.unsigned_abs());
            prop_assert_eq!(signal.abstained.len() + readings.len(), 4);

            let bar = regime.signal_threshold() as i32;
            let direction = if expected >= bar {
                Direction::Long
            } else if expected <= -bar {
                Direction::Short
            } else {
                Direction::Flat
            };
            prop_assert_eq!(signal.direction, direction);
            for tf in &signal.contributing {
                prop_assert_eq!(signal.votes[tf], direction.sign());
            }
        }
    }

    #[test]
    fn test_trend_bias_recorded() {
        let readings = BTreeMap::from([(Timeframe::H4, reading((60.0, 58.0), (62.0, 59.0)))]);
        let signal = aggregate(&readings, RegimeLabel::Trending, &SignalConfig::default());
        assert_eq!(signal.trend.get(&Timeframe::H4), Some(&TrendBias::Bullish));
    }
}
