//! OHLC bars and live quotes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// One OHLC bar for an instrument at a fixed sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }

    /// A bar is usable when every price is finite and
    /// `high >= max(open, close) >= min(open, close) >= low`.
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return false;
        }
        self.high >= self.open.max(self.close) && self.open.min(self.close) >= self.low
    }

    /// True range against the previous close; plain high-low range for the
    /// first bar of a series.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.high - self.low;
        match prev_close {
            Some(prev) => range
                .max((self.high - prev).abs())
                .max((self.low - prev).abs()),
            None => range,
        }
    }
}

/// Top-of-book quote for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Price an open position on `side` is marked at (and would exit at).
    pub fn mark_price(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.bid,
            Side::Sell => self.ask,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask >= self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Utc::now(), open, high, low, close)
    }

    #[test]
    fn test_bar_validity() {
        assert!(bar(1.10, 1.12, 1.09, 1.11).is_valid());
        // high below close
        assert!(!bar(1.10, 1.105, 1.09, 1.11).is_valid());
        // high < low
        assert!(!bar(1.10, 1.08, 1.12, 1.10).is_valid());
        assert!(!bar(f64::NAN, 1.12, 1.09, 1.11).is_valid());
        assert!(!bar(1.10, f64::INFINITY, 1.09, 1.11).is_valid());
    }

    #[test]
    fn test_true_range_uses_gap_from_previous_close() {
        let b = bar(1.20, 1.21, 1.19, 1.20);
        assert!((b.true_range(None) - 0.02).abs() < 1e-12);
        // Gap up from 1.10: |high - prev| = 0.11 dominates
        assert!((b.true_range(Some(1.10)) - 0.11).abs() < 1e-12);
    }

    #[test]
    fn test_quote_mark_price() {
        let q = Quote {
            bid: dec!(1.1000),
            ask: dec!(1.1002),
            timestamp: Utc::now(),
        };
        assert_eq!(q.mark_price(Side::Buy), dec!(1.1000));
        assert_eq!(q.mark_price(Side::Sell), dec!(1.1002));
        assert!(q.is_valid());
    }
}
