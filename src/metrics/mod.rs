//! Closed-trade performance statistics for the `report` command.

mod calculator;

pub use calculator::{MetricsCalculator, TradeOutcome};
