//! Position repository owned by the evaluation loop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::config::LifecycleConfig;
use super::lifecycle::{on_price_update, PositionEvent};
use crate::models::Position;

/// Why [`PositionBook::open`] did not record a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// The instrument already has a non-closed position.
    AlreadyOpen,
    /// `max_open` positions are already active.
    CapacityReached,
}

impl Rejected {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejected::AlreadyOpen => "position already open",
            Rejected::CapacityReached => "max open positions reached",
        }
    }
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding one price to an active position.
#[derive(Debug)]
pub struct PriceUpdate {
    pub events: Vec<PositionEvent>,
    /// The position after the update
    pub position: Position,
}

impl PriceUpdate {
    pub fn closed(&self) -> bool {
        self.position.is_closed()
    }
}

/// Active positions keyed by instrument, plus the closed history.
///
/// At most one non-closed position exists per instrument.
#[derive(Debug)]
pub struct PositionBook {
    active: HashMap<String, Position>,
    closed: Vec<Position>,
    max_open: usize,
}

impl PositionBook {
    pub fn new(max_open: usize) -> Self {
        Self {
            active: HashMap::new(),
            closed: Vec::new(),
            max_open,
        }
    }

    /// Record a new position. A rejection leaves the book unchanged.
    pub fn open(&mut self, position: Position) -> Result<&Position, Rejected> {
        if self.active.contains_key(&position.instrument) {
            return Err(Rejected::AlreadyOpen);
        }
        if self.active.len() >= self.max_open {
            return Err(Rejected::CapacityReached);
        }
        let key = position.instrument.clone();
        Ok(self.active.entry(key).or_insert(position))
    }

    pub fn has_open(&self, instrument: &str) -> bool {
        self.active.contains_key(instrument)
    }

    pub fn get(&self, instrument: &str) -> Option<&Position> {
        self.active.get(instrument)
    }

    /// Run the lifecycle on the instrument's active position. A position
    /// that reaches CLOSED moves into the closed history.
    pub fn apply_price(
        &mut self,
        instrument: &str,
        price: Decimal,
        now: DateTime<Utc>,
        config: &LifecycleConfig,
    ) -> Option<PriceUpdate> {
        let position = self.active.get_mut(instrument)?;
        let events = on_price_update(position, price, now, config);

        if position.is_closed() {
            let position = self.active.remove(instrument)?;
            self.closed.push(position.clone());
            return Some(PriceUpdate { events, position });
        }

        Some(PriceUpdate {
            events,
            position: position.clone(),
        })
    }

    pub fn closed(&self) -> &[Position] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloseReason, InstrumentProfile, PositionState, Side};
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position::new(
            &InstrumentProfile::for_symbol(symbol),
            Side::Buy,
            dec!(1.1000),
            dec!(0.1),
            dec!(1.0990),
            vec![dec!(1.1005), dec!(1.1010), dec!(1.1015)],
            Utc::now(),
        )
    }

    #[test]
    fn test_second_open_is_rejected_and_first_unchanged() {
        let mut book = PositionBook::new(10);
        let first_id = book.open(position("EURUSD")).unwrap().id;

        let mut other = position("EURUSD");
        other.entry_price = dec!(1.2000);
        assert_eq!(book.open(other).unwrap_err(), Rejected::AlreadyOpen);

        assert_eq!(book.open_count(), 1);
        let kept = book.get("EURUSD").unwrap();
        assert_eq!(kept.id, first_id);
        assert_eq!(kept.entry_price, dec!(1.1000));
    }

    #[test]
    fn test_capacity_limit() {
        let mut book = PositionBook::new(1);
        book.open(position("EURUSD")).unwrap();
        assert_eq!(
            book.open(position("GBPUSD")).unwrap_err(),
            Rejected::CapacityReached
        );
    }

    #[test]
    fn test_closed_position_moves_to_history_and_frees_instrument() {
        let mut book = PositionBook::new(10);
        let config = LifecycleConfig::default();
        book.open(position("EURUSD")).unwrap();

        let update = book
            .apply_price("EURUSD", dec!(1.1006), Utc::now(), &config)
            .unwrap();
        assert!(!update.closed());
        assert_eq!(update.position.state, PositionState::Partial);
        assert!(book.has_open("EURUSD"));

        let update = book
            .apply_price("EURUSD", dec!(1.0980), Utc::now(), &config)
            .unwrap();
        assert!(update.closed());
        assert_eq!(update.position.close_reason, Some(CloseReason::StopLoss));
        assert!(!book.has_open("EURUSD"));
        assert_eq!(book.closed().len(), 1);

        assert!(book.open(position("EURUSD")).is_ok());
    }

    #[test]
    fn test_price_for_unknown_instrument_is_none() {
        let mut book = PositionBook::new(10);
        assert!(book
            .apply_price("USDJPY", dec!(150), Utc::now(), &LifecycleConfig::default())
            .is_none());
    }
}
