//! Static per-instrument scaling metadata.
//!
//! JPY-quoted pairs and metals use a different pip unit than standard FX
//! pairs. Every place that turns a price delta into pips, money, or a
//! static take-profit distance goes through an [`InstrumentProfile`].

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Scaling class of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    /// Standard FX pair quoted to 5 digits (EURUSD, GBPUSD, USDCAD).
    Standard,
    /// FX pair quoted in yen (USDJPY, EURJPY).
    JpyQuoted,
    /// Precious metal quoted in USD (XAUUSD, XAGUSD).
    Metal,
}

impl InstrumentClass {
    /// Guess the class from a symbol such as `USDJPY`, `XAU/USD` or `EURUSD`.
    pub fn from_symbol(symbol: &str) -> Self {
        let s: String = symbol
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if ["XAU", "XAG", "XPT", "XPD"].iter().any(|m| s.starts_with(m)) {
            InstrumentClass::Metal
        } else if s.ends_with("JPY") {
            InstrumentClass::JpyQuoted
        } else {
            InstrumentClass::Standard
        }
    }

    pub fn pip_unit(&self) -> Decimal {
        match self {
            InstrumentClass::Standard => dec!(0.0001),
            InstrumentClass::JpyQuoted => dec!(0.01),
            InstrumentClass::Metal => dec!(0.1),
        }
    }

    pub fn price_digits(&self) -> u32 {
        match self {
            InstrumentClass::Standard => 5,
            InstrumentClass::JpyQuoted => 3,
            InstrumentClass::Metal => 2,
        }
    }

    /// Units of the base asset per 1.0 lot.
    pub fn contract_size(&self) -> Decimal {
        match self {
            InstrumentClass::Standard | InstrumentClass::JpyQuoted => dec!(100000),
            InstrumentClass::Metal => dec!(100),
        }
    }

    /// Fallback take-profit distances in pips, used when no volatility
    /// measure is available.
    pub fn static_targets_pips(&self) -> Vec<Decimal> {
        match self {
            InstrumentClass::Standard | InstrumentClass::JpyQuoted => {
                vec![dec!(10), dec!(20), dec!(30)]
            }
            InstrumentClass::Metal => vec![dec!(50), dec!(100), dec!(150)],
        }
    }

    pub fn static_stop_pips(&self) -> Decimal {
        match self {
            InstrumentClass::Standard | InstrumentClass::JpyQuoted => dec!(15),
            InstrumentClass::Metal => dec!(75),
        }
    }
}

/// Fully resolved, read-only profile for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    /// Canonical symbol used in logs, events and the position book (`EURUSD`)
    pub symbol: String,

    pub class: InstrumentClass,

    /// Minimum meaningful price increment
    pub pip_unit: Decimal,

    /// Decimal places target and stop levels are rounded to
    pub price_digits: u32,

    /// Units per 1.0 lot, used to scale P&L
    pub contract_size: Decimal,

    /// Static take-profit table in pips, nearest first
    pub static_targets_pips: Vec<Decimal>,

    /// Static stop-loss distance in pips
    pub static_stop_pips: Decimal,

    /// Symbol understood by the market data feed (`EURUSD=X`)
    pub feed_symbol: String,
}

impl InstrumentProfile {
    /// Profile built purely from class defaults.
    pub fn for_symbol(symbol: &str) -> Self {
        InstrumentSpec {
            symbol: symbol.to_string(),
            ..InstrumentSpec::default()
        }
        .resolve()
    }

    /// Round a price to this instrument's quoting precision (half away from zero).
    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_digits, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Smallest quoted price increment (`10^-price_digits`).
    pub fn tick_size(&self) -> Decimal {
        Decimal::new(1, self.price_digits)
    }

    /// Convert a number of pips into a price delta.
    pub fn from_pips(&self, pips: Decimal) -> Decimal {
        pips * self.pip_unit
    }
}

/// Instrument entry as written in a settings file. Anything left out falls
/// back to the defaults of the symbol's class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub class: Option<InstrumentClass>,
    pub pip_unit: Option<Decimal>,
    pub price_digits: Option<u32>,
    pub contract_size: Option<Decimal>,
    pub static_targets_pips: Option<Vec<Decimal>>,
    pub static_stop_pips: Option<Decimal>,
    pub feed_symbol: Option<String>,
}

impl InstrumentSpec {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Fill every missing field from the class defaults.
    pub fn resolve(self) -> InstrumentProfile {
        let symbol: String = self
            .symbol
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let class = self
            .class
            .unwrap_or_else(|| InstrumentClass::from_symbol(&symbol));

        let static_targets_pips = self
            .static_targets_pips
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| class.static_targets_pips());

        let feed_symbol = self
            .feed_symbol
            .unwrap_or_else(|| default_feed_symbol(&symbol, class));

        InstrumentProfile {
            pip_unit: self
                .pip_unit
                .filter(|p| *p > Decimal::ZERO)
                .unwrap_or_else(|| class.pip_unit()),
            price_digits: self.price_digits.unwrap_or_else(|| class.price_digits()),
            contract_size: self
                .contract_size
                .filter(|c| *c > Decimal::ZERO)
                .unwrap_or_else(|| class.contract_size()),
            static_targets_pips,
            static_stop_pips: self
                .static_stop_pips
                .filter(|s| *s > Decimal::ZERO)
                .unwrap_or_else(|| class.static_stop_pips()),
            feed_symbol,
            symbol,
            class,
        }
    }
}

/// Yahoo chart symbols: `EURUSD=X` for FX, front-month futures for metals.
fn default_feed_symbol(symbol: &str, class: InstrumentClass) -> String {
    match (class, symbol) {
        (InstrumentClass::Metal, "XAUUSD") => "GC=F".to_string(),
        (InstrumentClass::Metal, "XAGUSD") => "SI=F".to_string(),
        _ => format!("{}=X", symbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_from_symbol() {
        assert_eq!(InstrumentClass::from_symbol("EURUSD"), InstrumentClass::Standard);
        assert_eq!(InstrumentClass::from_symbol("usd/jpy"), InstrumentClass::JpyQuoted);
        assert_eq!(InstrumentClass::from_symbol("XAUUSD"), InstrumentClass::Metal);
        assert_eq!(InstrumentClass::from_symbol("XAG/USD"), InstrumentClass::Metal);
    }

    #[test]
    fn test_profile_defaults_by_class() {
        let eur = InstrumentProfile::for_symbol("EUR/USD");
        assert_eq!(eur.symbol, "EURUSD");
        assert_eq!(eur.pip_unit, dec!(0.0001));
        assert_eq!(eur.feed_symbol, "EURUSD=X");

        let jpy = InstrumentProfile::for_symbol("USDJPY");
        assert_eq!(jpy.pip_unit, dec!(0.01));
        assert_eq!(jpy.price_digits, 3);

        let gold = InstrumentProfile::for_symbol("XAUUSD");
        assert_eq!(gold.pip_unit, dec!(0.1));
        assert_eq!(gold.contract_size, dec!(100));
        assert_eq!(gold.feed_symbol, "GC=F");
    }

    #[test]
    fn test_spec_overrides_and_invalid_values_fall_back() {
        let spec = InstrumentSpec {
            symbol: "EURUSD".to_string(),
            pip_unit: Some(Decimal::ZERO),
            static_targets_pips: Some(vec![]),
            static_stop_pips: Some(dec!(25)),
            ..InstrumentSpec::default()
        };
        let profile = spec.resolve();
        assert_eq!(profile.pip_unit, dec!(0.0001));
        assert_eq!(profile.static_targets_pips, vec![dec!(10), dec!(20), dec!(30)]);
        assert_eq!(profile.static_stop_pips, dec!(25));
    }

    #[test]
    fn test_round_price_half_away_from_zero() {
        let eur = InstrumentProfile::for_symbol("EURUSD");
        assert_eq!(eur.round_price(dec!(1.099665)), dec!(1.09967));
        let jpy = InstrumentProfile::for_symbol("USDJPY");
        assert_eq!(jpy.round_price(dec!(151.23456)), dec!(151.235));
    }

    #[test]
    fn test_pip_conversion() {
        let jpy = InstrumentProfile::for_symbol("USDJPY");
        assert_eq!(jpy.from_pips(dec!(10)), dec!(0.10));
    }
}
