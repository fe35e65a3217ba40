//! Indicator pipeline: bar window → [`IndicatorSnapshot`].
//!
//! Pure and deterministic. Malformed bars are dropped from the window before
//! anything is computed; a window that is too short after filtering yields
//! `None` ("not enough history yet"), never a partial snapshot.

mod atr;
mod ema;
mod macd;
mod rsi;

pub use atr::Atr;
pub use ema::Ema;
pub use macd::Macd;
pub use rsi::Rsi;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Bar;

/// Indicator periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Fast trend EMA period
    pub fast_period: usize,

    /// Slow trend EMA period
    pub slow_period: usize,

    pub rsi_period: usize,

    pub atr_period: usize,

    /// MACD fast/slow/signal periods (the momentum pair)
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    /// Extra bars required on top of the longest lookback
    pub warmup_margin: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 20,
            rsi_period: 14,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            warmup_margin: 5,
        }
    }
}

impl IndicatorConfig {
    /// Minimum number of valid bars before a snapshot is produced.
    pub fn min_bars(&self) -> usize {
        self.slow_period
            .max(self.rsi_period)
            .max(self.atr_period)
            .max(self.macd_slow + self.macd_signal)
            + self.warmup_margin
    }
}

/// Indicator values at the most recent bar of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Timestamp of the bar the snapshot describes
    pub as_of: DateTime<Utc>,
    pub close: f64,
    pub fast_average: f64,
    pub slow_average: f64,
    /// RSI, 0..=100
    pub oscillator: f64,
    /// ATR, >= 0
    pub volatility: f64,
    /// MACD line
    pub momentum_fast: f64,
    /// MACD signal line
    pub momentum_slow: f64,
}

impl IndicatorSnapshot {
    fn is_finite(&self) -> bool {
        [
            self.close,
            self.fast_average,
            self.slow_average,
            self.oscillator,
            self.volatility,
            self.momentum_fast,
            self.momentum_slow,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Compute the snapshot for the last bar of `bars` (oldest first).
pub fn compute_indicators(bars: &[Bar], config: &IndicatorConfig) -> Option<IndicatorSnapshot> {
    let valid: Vec<&Bar> = bars.iter().filter(|b| b.is_valid()).collect();
    if valid.len() < config.min_bars() {
        return None;
    }

    let mut fast = Ema::new(config.fast_period);
    let mut slow = Ema::new(config.slow_period);
    let mut rsi = Rsi::new(config.rsi_period);
    let mut atr = Atr::new(config.atr_period);
    let mut macd = Macd::new(config.macd_fast, config.macd_slow, config.macd_signal);

    for bar in &valid {
        fast.update(bar.close);
        slow.update(bar.close);
        rsi.update(bar.close);
        atr.update(bar);
        macd.update(bar.close);
    }

    let last = valid.last()?;
    let snapshot = IndicatorSnapshot {
        as_of: last.timestamp,
        close: last.close,
        fast_average: fast.value,
        slow_average: slow.value,
        oscillator: rsi.value.clamp(0.0, 100.0),
        volatility: atr.value.max(0.0),
        momentum_fast: macd.line,
        momentum_slow: macd.signal_line,
    };

    snapshot.is_finite().then_some(snapshot)
}

/// Snapshot as of the valid bar before the last valid one: the comparison
/// point for a window seen for the first time.
pub fn compute_previous_indicators(
    bars: &[Bar],
    config: &IndicatorConfig,
) -> Option<IndicatorSnapshot> {
    let last_valid = bars.iter().rposition(|b| b.is_valid())?;
    compute_indicators(&bars[..last_valid], config)
}
