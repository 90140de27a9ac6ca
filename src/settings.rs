// Runtime configuration: serde defaults, optional TOML file, KDJBOT__* env vars
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineError;
use crate::gateway::paper::PaperConfig;
use crate::indicators::KdjParams;
use crate::models::{RegimeLabel, Timeframe};
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::strategy::SignalConfig;

/// Shortest allowed pause between evaluation cycles
pub const MIN_CHECK_INTERVAL_SECS: u64 = 10;

const ENV_PREFIX: &str = "KDJBOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Futures,
}

impl MarketKind {
    /// Only derivatives can be sold short
    pub fn allows_short(&self) -> bool {
        matches!(self, MarketKind::Futures)
    }

    /// Standard taker commission per fill
    pub fn fee_rate(&self) -> f64 {
        match self {
            MarketKind::Spot => 0.001,
            MarketKind::Futures => 0.0004,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            MarketKind::Spot => "https://api.binance.com",
            MarketKind::Futures => "https://fapi.binance.com",
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::Spot => write!(f, "spot"),
            MarketKind::Futures => write!(f, "futures"),
        }
    }
}

/// Retry policy for market data HTTP requests
///
/// Applied once, inside the market data client. The engine does not retry on
/// top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Total attempts per request, including the first
    pub max_retries: u32,
    /// First backoff delay, doubled on each further attempt
    pub retry_delay_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl DataConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub symbol: String,
    pub market: MarketKind,
    pub check_interval_secs: u64,
    /// Defaults to `bot_state_{market}.json`
    pub state_path: Option<PathBuf>,
    /// Candles requested per timeframe each cycle
    pub candle_limit: usize,
    /// Oscillator points kept per timeframe
    pub retain_points: usize,
    /// Per-timeframe overrides of the default KDJ parameters
    pub kdj: BTreeMap<Timeframe, KdjParams>,
    pub signal: SignalConfig,
    pub regime: RegimeConfig,
    pub risk: RiskConfig,
    pub data: DataConfig,
    pub paper: PaperConfig,
    pub api_base_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            market: MarketKind::Futures,
            check_interval_secs: 30,
            state_path: None,
            candle_limit: 100,
            retain_points: 30,
            kdj: BTreeMap::new(),
            signal: SignalConfig::default(),
            regime: RegimeConfig::default(),
            risk: RiskConfig::default(),
            data: DataConfig::default(),
            paper: PaperConfig::default(),
            api_base_url: None,
        }
    }
}

impl BotConfig {
    /// Layer the optional file and environment over the defaults, then validate
    ///
    /// Environment keys use `__` as separator, e.g.
    /// `KDJBOT__RISK__RISK_FRACTION=0.02`.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("kdjbot").required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: BotConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check ranges and normalise values that have safe fallbacks
    pub fn validate(&mut self) -> Result<(), EngineError> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::Config("symbol must not be empty".to_string()));
        }
        self.symbol = self.symbol.trim().to_uppercase();

        if self.check_interval_secs < MIN_CHECK_INTERVAL_SECS {
            tracing::warn!(
                requested = self.check_interval_secs,
                minimum = MIN_CHECK_INTERVAL_SECS,
                "Check interval too short, using minimum"
            );
            self.check_interval_secs = MIN_CHECK_INTERVAL_SECS;
        }

        for (timeframe, params) in &self.kdj {
            params
                .validate()
                .map_err(|e| EngineError::Config(format!("{}: {}", timeframe, e)))?;
        }

        let longest = Timeframe::ALL
            .iter()
            .map(|tf| self.kdj_params(*tf, RegimeLabel::Trending).k_period)
            .max()
            .unwrap_or(0);
        if self.candle_limit < longest + 1 {
            return Err(EngineError::Config(format!(
                "candle_limit {} too small for K period {}",
                self.candle_limit, longest
            )));
        }
        if self.retain_points < 2 {
            return Err(EngineError::Config(
                "retain_points must be at least 2".to_string(),
            ));
        }

        if let Some(fee_rate) = self.paper.fee_rate {
            if !(0.0..0.1).contains(&fee_rate) {
                return Err(EngineError::Config(format!(
                    "paper fee_rate must be in [0, 0.1), got {}",
                    fee_rate
                )));
            }
        }

        self.signal.validate()?;
        self.regime.validate()?;
        self.risk.validate()?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("bot_state_{}.json", self.market)))
    }

    /// Paper venue settings with the fee resolved for the configured market
    pub fn paper_config(&self) -> PaperConfig {
        PaperConfig {
            fee_rate: Some(self.paper.fee_rate.unwrap_or_else(|| self.market.fee_rate())),
            ..self.paper.clone()
        }
    }

    pub fn base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.market.default_base_url().to_string())
    }

    /// KDJ parameters for `timeframe`
    ///
    /// With regime adaptation on, the regime preset wins over configured values.
    pub fn kdj_params(&self, timeframe: Timeframe, regime: RegimeLabel) -> KdjParams {
        if self.signal.adapt_kdj_to_regime {
            return KdjParams::preset(regime, timeframe);
        }
        self.kdj
            .get(&timeframe)
            .copied()
            .unwrap_or_else(|| KdjParams::default_for(timeframe))
    }
}
