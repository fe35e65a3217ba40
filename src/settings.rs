//! Startup settings: defaults overlaid by an optional JSON file, validated
//! once and then read-only for the lifetime of the process.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{InstrumentProfile, InstrumentSpec};
use crate::trading::{is_strictly_increasing_positive, ConfigError, StrategyConfig};

/// Where orders go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TradingMode {
    /// Simulated fills, nothing leaves the process
    Paper,
    /// Orders are posted to the broker bridge
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

/// Immutable settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Instruments evaluated every tick, in this order
    pub instruments: Vec<InstrumentSpec>,

    pub strategy: StrategyConfig,

    /// Seconds between evaluation ticks
    pub tick_interval_secs: u64,

    /// Upper bound on every market-data request
    pub fetch_timeout_secs: u64,

    /// Bars requested per instrument
    pub bar_count: usize,

    pub max_open_positions: usize,

    /// Bar interval understood by the feed ("5m")
    pub feed_interval: String,

    /// History range requested from the feed ("5d")
    pub feed_range: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instruments: ["EURUSD", "GBPUSD", "USDJPY", "USDCAD", "XAUUSD"]
                .into_iter()
                .map(InstrumentSpec::new)
                .collect(),
            strategy: StrategyConfig::default(),
            tick_interval_secs: 60,
            fetch_timeout_secs: 10,
            bar_count: 300,
            max_open_positions: 10,
            feed_interval: "5m".to_string(),
            feed_range: "5d".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid by `path` when given, then validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                Self::from_json(&raw)
                    .with_context(|| format!("Invalid settings file {}", path.display()))?
            }
            None => Self::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse settings JSON")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::ZeroPeriod("tick_interval_secs"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroPeriod("fetch_timeout_secs"));
        }
        let min = self.strategy.indicators.min_bars();
        if self.bar_count < min {
            return Err(ConfigError::BarCount {
                count: self.bar_count,
                min,
            });
        }

        for profile in self.profiles() {
            if !is_strictly_increasing_positive(&profile.static_targets_pips)
                || profile.static_stop_pips <= Decimal::ZERO
            {
                return Err(ConfigError::StaticTargets {
                    instrument: profile.symbol,
                    pips: profile.static_targets_pips,
                });
            }
        }

        self.strategy.validate()
    }

    /// Resolved profiles in configured order.
    pub fn profiles(&self) -> Vec<InstrumentProfile> {
        self.instruments.iter().cloned().map(InstrumentSpec::resolve).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
