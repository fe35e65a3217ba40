//! Directional trade signals produced once per tick for flat instruments.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Classifier decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    None,
}

impl Direction {
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Buy => Some(Side::Buy),
            Direction::Sell => Some(Side::Sell),
            Direction::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::None => "NONE",
        }
    }
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Direction::Buy,
            Side::Sell => Direction::Sell,
        }
    }
}

/// Classifier gate that can veto a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Trend,
    Momentum,
    Oscillator,
}

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Indicators,
    External,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Indicators => "indicators",
            SignalSource::External => "external",
        }
    }
}

/// Output of the classifier for one instrument on one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub direction: Direction,

    /// Human-readable justification, one entry per evaluated gate
    pub reasons: Vec<String>,

    /// Gate that vetoed the signal when `direction` is NONE
    pub rejected_by: Option<Gate>,

    /// Close of the bar the signal was computed on
    pub reference_price: Decimal,

    /// Volatility (ATR) when positive, used to scale targets
    pub volatility_at_signal: Option<Decimal>,

    /// Set when no usable volatility exists and targets must come from the
    /// static per-instrument table
    pub needs_fallback_targets: bool,

    pub source: SignalSource,

    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::None
    }
}
