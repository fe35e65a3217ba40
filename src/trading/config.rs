//! Strategy configuration: classifier bands, target multipliers, exit rules,
//! sizing and trading session.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indicators::IndicatorConfig;

/// Invalid configuration detected at load time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("indicator period `{0}` must be positive")]
    ZeroPeriod(&'static str),

    #[error("target multipliers must be non-empty, positive and strictly increasing: {0:?}")]
    TargetMultipliers(Vec<Decimal>),

    #[error("stop multiplier must be positive, got {0}")]
    StopMultiplier(Decimal),

    #[error("static target table for {instrument} must be positive and strictly increasing: {pips:?}")]
    StaticTargets { instrument: String, pips: Vec<Decimal> },

    #[error("partial close fraction must be in (0, 1), got {0}")]
    PartialFraction(Decimal),

    #[error("partial lot step must be positive, got {0}")]
    PartialLotStep(Decimal),

    #[error("{rule} target index {index} out of range for {count} targets")]
    TargetIndex {
        rule: &'static str,
        index: usize,
        count: usize,
    },

    #[error("oscillator band [{min}, {max}] must satisfy 0 <= min <= max <= 100")]
    OscillatorBand { min: f64, max: f64 },

    #[error("invalid sizing: {0}")]
    Sizing(String),

    #[error("bar count {count} is below the {min} bars the indicators need")]
    BarCount { count: usize, min: usize },

    #[error("no instruments configured")]
    NoInstruments,
}

/// How the momentum gate confirms a trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumRule {
    /// MACD line must sit on the trend side of its signal line.
    #[default]
    SecondaryPair,
    /// The fast/slow averages must have crossed between the previous and
    /// current snapshot.
    PrimaryCrossover,
}

/// Inclusive oscillator band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorBand {
    pub min: f64,
    pub max: f64,
}

impl OscillatorBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ok = self.min.is_finite()
            && self.max.is_finite()
            && 0.0 <= self.min
            && self.min <= self.max
            && self.max <= 100.0;
        if ok {
            Ok(())
        } else {
            Err(ConfigError::OscillatorBand {
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Signal classifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// RSI band a BUY must sit in
    pub buy_band: OscillatorBand,

    /// RSI band a SELL must sit in
    pub sell_band: OscillatorBand,

    pub momentum_rule: MomentumRule,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            buy_band: OscillatorBand::new(45.0, 65.0),
            sell_band: OscillatorBand::new(35.0, 55.0),
            momentum_rule: MomentumRule::SecondaryPair,
        }
    }
}

/// Volatility multipliers for take-profit and stop levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// ATR multiples for T1..Tn, nearest first
    pub multipliers: Vec<Decimal>,

    /// ATR multiple for the stop distance
    pub stop_multiplier: Decimal,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            multipliers: vec![dec!(1.0), dec!(1.5), dec!(2.0)],
            stop_multiplier: dec!(0.67),
        }
    }
}

/// Which exit check wins when one price update crosses both a target and
/// the stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPriority {
    #[default]
    StopFirst,
    TargetsFirst,
}

/// Staged exit rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Close part of the position when `partial_target` is hit
    pub partial_close: bool,

    /// Share of the remaining size closed at the partial target (0.0 to 1.0)
    pub partial_fraction: Decimal,

    pub partial_target: usize,

    /// Partial closes are rounded down to a multiple of this size
    pub partial_lot_step: Decimal,

    /// Move the stop to entry when `breakeven_target` is hit
    pub breakeven: bool,

    pub breakeven_target: usize,

    pub exit_priority: ExitPriority,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            partial_close: true,
            partial_fraction: dec!(0.5), // Close half at T1
            partial_target: 0,
            partial_lot_step: dec!(0.01),
            breakeven: true,
            breakeven_target: 1, // Stop to entry at T2
            exit_priority: ExitPriority::StopFirst,
        }
    }
}

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Same lot size for every trade
    #[default]
    Fixed,
    /// Lot size that loses `risk_per_trade` of the balance at the stop
    RiskBased,
}

/// Lot sizing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub method: SizingMethod,

    /// Lots per trade for fixed sizing
    pub fixed_lot: Decimal,

    /// Account balance in account currency
    pub balance: Decimal,

    /// Fraction of balance risked per trade (0.0 to 1.0)
    pub risk_per_trade: Decimal,

    pub min_lot: Decimal,

    pub max_lot: Decimal,

    /// Broker lot increment; sizes are rounded down to it
    pub lot_step: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            method: SizingMethod::Fixed,
            fixed_lot: dec!(0.1),
            balance: dec!(100000),
            risk_per_trade: dec!(0.01), // 1% per trade
            min_lot: dec!(0.01),
            max_lot: dec!(10),
            lot_step: dec!(0.01),
        }
    }
}

impl SizingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_lot <= Decimal::ZERO {
            return Err(ConfigError::Sizing(format!(
                "fixed lot must be positive, got {}",
                self.fixed_lot
            )));
        }
        if self.min_lot <= Decimal::ZERO || self.lot_step <= Decimal::ZERO {
            return Err(ConfigError::Sizing(
                "min lot and lot step must be positive".to_string(),
            ));
        }
        if self.max_lot < self.min_lot {
            return Err(ConfigError::Sizing(format!(
                "max lot {} below min lot {}",
                self.max_lot, self.min_lot
            )));
        }
        if self.method == SizingMethod::RiskBased
            && (self.balance <= Decimal::ZERO
                || self.risk_per_trade <= Decimal::ZERO
                || self.risk_per_trade >= Decimal::ONE)
        {
            return Err(ConfigError::Sizing(format!(
                "risk-based sizing needs a positive balance and risk in (0, 1), got {} / {}",
                self.balance, self.risk_per_trade
            )));
        }
        Ok(())
    }
}

/// Trading hours (UTC) during which new entries are allowed.
///
/// Open positions keep being managed outside the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl SessionConfig {
    /// Whether new entries are allowed at `now`. A window with
    /// `start > end` wraps past midnight.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let t = now.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Everything the signal and exit logic needs, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub indicators: IndicatorConfig,
    pub classifier: ClassifierConfig,
    pub targets: TargetConfig,
    pub lifecycle: LifecycleConfig,
    pub sizing: SizingConfig,
    pub session: SessionConfig,
}

impl StrategyConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ind = &self.indicators;
        for (name, period) in [
            ("fast_period", ind.fast_period),
            ("slow_period", ind.slow_period),
            ("rsi_period", ind.rsi_period),
            ("atr_period", ind.atr_period),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("macd_signal", ind.macd_signal),
        ] {
            if period == 0 {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }

        self.classifier.buy_band.validate()?;
        self.classifier.sell_band.validate()?;

        let multipliers = &self.targets.multipliers;
        if !is_strictly_increasing_positive(multipliers) {
            return Err(ConfigError::TargetMultipliers(multipliers.clone()));
        }
        if self.targets.stop_multiplier <= Decimal::ZERO {
            return Err(ConfigError::StopMultiplier(self.targets.stop_multiplier));
        }

        let lc = &self.lifecycle;
        if lc.partial_close {
            if lc.partial_fraction <= Decimal::ZERO || lc.partial_fraction >= Decimal::ONE {
                return Err(ConfigError::PartialFraction(lc.partial_fraction));
            }
            if lc.partial_lot_step <= Decimal::ZERO {
                return Err(ConfigError::PartialLotStep(lc.partial_lot_step));
            }
            if lc.partial_target >= multipliers.len() {
                return Err(ConfigError::TargetIndex {
                    rule: "partial",
                    index: lc.partial_target,
                    count: multipliers.len(),
                });
            }
        }
        if lc.breakeven && lc.breakeven_target >= multipliers.len() {
            return Err(ConfigError::TargetIndex {
                rule: "breakeven",
                index: lc.breakeven_target,
                count: multipliers.len(),
            });
        }

        self.sizing.validate()
    }
}

pub(crate) fn is_strictly_increasing_positive(values: &[Decimal]) -> bool {
    !values.is_empty()
        && values.iter().all(|v| *v > Decimal::ZERO)
        && values.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(StrategyConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_oscillator_band_inclusive() {
        let band = ClassifierConfig::default().buy_band;
        assert!(band.contains(45.0));
        assert!(band.contains(65.0));
        assert!(!band.contains(65.01));
    }

    #[test]
    fn test_rejects_non_increasing_multipliers() {
        let mut config = StrategyConfig::default();
        config.targets.multipliers = vec![dec!(1.0), dec!(1.0), dec!(2.0)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TargetMultipliers(_))
        ));

        config.targets.multipliers = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_rule_targets() {
        let mut config = StrategyConfig::default();
        config.targets.multipliers = vec![dec!(1.0)];
        assert_eq!(
            config.validate(),
            Err(ConfigError::TargetIndex {
                rule: "breakeven",
                index: 1,
                count: 1
            })
        );

        config.lifecycle.breakeven = false;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_partial_fraction() {
        let mut config = StrategyConfig::default();
        config.lifecycle.partial_fraction = dec!(1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::PartialFraction(dec!(1.0)))
        );
    }

    #[test]
    fn test_rejects_zero_partial_lot_step() {
        let mut config = StrategyConfig::default();
        config.lifecycle.partial_lot_step = Decimal::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::PartialLotStep(Decimal::ZERO)));
    }

    #[test]
    fn test_session_window() {
        let session = SessionConfig::default();
        assert!(!session.is_open(at(6, 59)));
        assert!(session.is_open(at(7, 0)));
        assert!(session.is_open(at(19, 59)));
        assert!(!session.is_open(at(20, 0)));

        let disabled = SessionConfig {
            enabled: false,
            ..SessionConfig::default()
        };
        assert!(disabled.is_open(at(3, 0)));
    }

    #[test]
    fn test_session_wraps_midnight() {
        let session = SessionConfig {
            enabled: true,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        };
        assert!(session.is_open(at(23, 30)));
        assert!(session.is_open(at(1, 0)));
        assert!(!session.is_open(at(12, 0)));
    }

    #[test]
    fn test_partial_config_from_json_keeps_defaults() {
        let config: StrategyConfig =
            serde_json::from_str(r#"{"lifecycle": {"exit_priority": "targets_first"}}"#).unwrap();
        assert_eq!(config.lifecycle.exit_priority, ExitPriority::TargetsFirst);
        assert_eq!(config.lifecycle.partial_fraction, dec!(0.5));
        assert_eq!(config.targets.multipliers.len(), 3);
    }
}
