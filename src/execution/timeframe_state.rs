use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::error::EngineError;
use crate::indicators::{compute_oscillator, KdjParams};
use crate::models::{Candle, OscillatorPoint, Timeframe};
use crate::strategy::TimeframeReading;

/// Candles and oscillator points for one timeframe
///
/// Updates are all-or-nothing: a snapshot is validated and its oscillator
/// computed before anything stored is replaced.
///
/// A closed candle votes once. `last_voted` remembers the newest point that
/// already took part in a vote, so later cycles on the same candles hold.
#[derive(Debug, Clone)]
pub struct TimeframeState {
    timeframe: Timeframe,
    candles: VecDeque<Candle>,
    points: VecDeque<OscillatorPoint>,
    max_candles: usize,
    retain_points: usize,
    last_voted: Option<DateTime<Utc>>,
}

impl TimeframeState {
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep
    /// * `retain_points` - Number of most recent oscillator points to keep
    pub fn new(timeframe: Timeframe, max_candles: usize, retain_points: usize) -> Self {
        Self {
            timeframe,
            candles: VecDeque::new(),
            points: VecDeque::new(),
            max_candles,
            retain_points: retain_points.max(2),
            last_voted: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Check ordering and spacing of a snapshot against this timeframe
    fn validate(&self, candles: &[Candle]) -> Result<(), EngineError> {
        let fail = |reason: String| Err(EngineError::data_unavailable(Some(self.timeframe), reason));

        let Some(newest) = candles.last() else {
            return fail("empty candle snapshot".to_string());
        };

        let expected = self.timeframe.duration();
        for window in candles.windows(2) {
            let gap = window[1].open_time - window[0].open_time;
            if gap <= chrono::Duration::zero() {
                return fail(format!(
                    "candles out of order at {}",
                    window[1].open_time
                ));
            }
            if gap != expected {
                return fail(format!(
                    "gap of {}s between {} and {} (expected {}s)",
                    gap.num_seconds(),
                    window[0].open_time,
                    window[1].open_time,
                    expected.num_seconds()
                ));
            }
        }

        if let Some(stored) = self.candles.back() {
            if newest.open_time < stored.open_time {
                return fail(format!(
                    "snapshot ends at {} but state already holds {}",
                    newest.open_time, stored.open_time
                ));
            }
        }

        Ok(())
    }

    /// Replace the state with a fresh snapshot
    ///
    /// On error the previous candles and points are left untouched.
    pub fn apply_snapshot(&mut self, candles: Vec<Candle>, params: KdjParams) -> Result<(), EngineError> {
        self.validate(&candles)?;

        let start = candles.len().saturating_sub(self.max_candles);
        let candles = &candles[start..];

        let series = compute_oscillator(candles, params);
        if series.len() < 2 {
            return Err(EngineError::data_unavailable(
                Some(self.timeframe),
                format!(
                    "{} candles are not enough for K period {}",
                    candles.len(),
                    params.k_period
                ),
            ));
        }

        let skip = series.len().saturating_sub(self.retain_points);
        self.points = series.into_iter().skip(skip).collect();
        self.candles = candles.iter().cloned().collect();

        Ok(())
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn points(&self) -> &VecDeque<OscillatorPoint> {
        &self.points
    }

    pub fn latest_candle(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Latest point and its predecessor
    pub fn latest_reading(&self) -> Option<TimeframeReading> {
        let n = self.points.len();
        if n < 2 {
            return None;
        }
        Some(TimeframeReading {
            previous: self.points[n - 2],
            current: self.points[n - 1],
        })
    }

    /// Reading for this cycle's vote
    ///
    /// The first call for a new point returns the latest reading and marks it
    /// voted. Later calls on the same point return a held reading (both points
    /// equal), which keeps the trend bias but cannot cross or turn.
    pub fn take_vote_reading(&mut self) -> Option<TimeframeReading> {
        let reading = self.latest_reading()?;
        let timestamp = reading.current.timestamp;

        if self.last_voted.is_some_and(|voted| timestamp <= voted) {
            return Some(TimeframeReading {
                previous: reading.current,
                current: reading.current,
            });
        }

        self.last_voted = Some(timestamp);
        Some(reading)
    }

    pub fn last_voted(&self) -> Option<DateTime<Utc>> {
        self.last_voted
    }

    /// Restore the vote marker saved before a restart
    pub fn set_last_voted(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.last_voted = timestamp;
    }

    /// Drop candles and points. The vote marker survives so a refill with the
    /// same candles does not vote twice.
    pub fn clear(&mut self) {
        self.candles.clear();
        self.points.clear();
    }
}
