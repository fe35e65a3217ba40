//! Position model: one staged-exit trade on one instrument.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CloseReason, InstrumentProfile, Side};

/// Lifecycle state. Ordered: a position only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    Partial,
    Breakeven,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "OPEN",
            PositionState::Partial => "PARTIAL",
            PositionState::Breakeven => "BREAKEVEN",
            PositionState::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open or closed position with staged take-profit levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,

    pub instrument: String,

    pub side: Side,

    pub entry_price: Decimal,

    /// Size at entry, in lots
    pub initial_lot_size: Decimal,

    /// Remaining exposed size; shrinks on partial close
    pub lot_size: Decimal,

    /// Stop at entry, kept for reporting after breakeven migration
    pub initial_stop_loss: Decimal,

    /// Current stop; moves to `entry_price` at breakeven
    pub stop_loss: Decimal,

    /// Take-profit levels, nearest first
    pub targets: Vec<Decimal>,

    /// Indices of targets already reached. Never shrinks.
    pub targets_hit: BTreeSet<usize>,

    pub state: PositionState,

    /// Last price the lifecycle saw
    pub last_price: Decimal,

    /// P&L locked in by partial and final closes, in account currency
    pub realized_pnl: Decimal,

    /// Copied from the instrument profile so P&L needs no lookup
    pub pip_unit: Decimal,
    pub contract_size: Decimal,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_price: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Create a new OPEN position.
    pub fn new(
        profile: &InstrumentProfile,
        side: Side,
        entry_price: Decimal,
        lot_size: Decimal,
        stop_loss: Decimal,
        targets: Vec<Decimal>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: profile.symbol.clone(),
            side,
            entry_price,
            initial_lot_size: lot_size,
            lot_size,
            initial_stop_loss: stop_loss,
            stop_loss,
            targets,
            targets_hit: BTreeSet::new(),
            state: PositionState::Open,
            last_price: entry_price,
            realized_pnl: Decimal::ZERO,
            pip_unit: profile.pip_unit,
            contract_size: profile.contract_size,
            opened_at,
            closed_at: None,
            close_price: None,
            close_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }

    pub fn is_target_hit(&self, index: usize) -> bool {
        self.targets_hit.contains(&index)
    }

    /// Price delta in the position's favor (negative when losing).
    pub fn favorable_move(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.side.sign()
    }

    /// Whether `price` has reached target `index` in the favorable direction.
    pub fn target_crossed(&self, index: usize, price: Decimal) -> bool {
        match (self.targets.get(index), self.side) {
            (Some(level), Side::Buy) => price >= *level,
            (Some(level), Side::Sell) => price <= *level,
            (None, _) => false,
        }
    }

    /// Whether `price` has reached the current stop.
    pub fn stop_crossed(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_loss,
            Side::Sell => price >= self.stop_loss,
        }
    }

    /// Money P&L of moving `lots` from entry to `price`.
    pub fn pnl_for(&self, price: Decimal, lots: Decimal) -> Decimal {
        self.favorable_move(price) * lots * self.contract_size
    }

    /// Unrealized P&L of the remaining size at `price`.
    pub fn floating_pnl(&self, price: Decimal) -> Decimal {
        if self.is_closed() {
            return Decimal::ZERO;
        }
        self.pnl_for(price, self.lot_size)
    }

    /// Unrealized move in pips at `price`.
    pub fn floating_pips(&self, price: Decimal) -> Decimal {
        if self.pip_unit.is_zero() {
            return Decimal::ZERO;
        }
        self.favorable_move(price) / self.pip_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eurusd(side: Side) -> Position {
        let profile = InstrumentProfile::for_symbol("EURUSD");
        let (stop, targets) = match side {
            Side::Buy => (dec!(1.0990), vec![dec!(1.1005), dec!(1.1010), dec!(1.1015)]),
            Side::Sell => (dec!(1.1010), vec![dec!(1.0995), dec!(1.0990), dec!(1.0985)]),
        };
        Position::new(&profile, side, dec!(1.1000), dec!(0.1), stop, targets, Utc::now())
    }

    #[test]
    fn test_buy_crossings() {
        let pos = eurusd(Side::Buy);
        assert!(pos.target_crossed(0, dec!(1.1005)));
        assert!(!pos.target_crossed(1, dec!(1.1009)));
        assert!(!pos.target_crossed(7, dec!(2.0)));
        assert!(pos.stop_crossed(dec!(1.0990)));
        assert!(!pos.stop_crossed(dec!(1.0991)));
    }

    #[test]
    fn test_sell_crossings_are_mirrored() {
        let pos = eurusd(Side::Sell);
        assert!(pos.target_crossed(0, dec!(1.0994)));
        assert!(!pos.target_crossed(0, dec!(1.0996)));
        assert!(pos.stop_crossed(dec!(1.1011)));
    }

    #[test]
    fn test_floating_pnl_scaled_by_contract_and_pips() {
        let pos = eurusd(Side::Buy);
        // 10 pips on 0.1 lot of a 100k contract = 10 units of quote currency
        assert_eq!(pos.floating_pnl(dec!(1.1010)), dec!(10));
        assert_eq!(pos.floating_pips(dec!(1.1010)), dec!(10));

        let short = eurusd(Side::Sell);
        assert_eq!(short.floating_pnl(dec!(1.1010)), dec!(-10));
    }
}
