//! Position sizing: fixed lot or fixed-fraction risk at the stop.

use rust_decimal::{Decimal, RoundingStrategy};

use super::config::{SizingConfig, SizingMethod};
use crate::models::InstrumentProfile;

/// Calculator for lot sizes.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    /// Create a new position sizer with given config.
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Lots to trade for an entry with the given stop.
    ///
    /// Risk-based sizing solves
    ///   lots · |entry − stop| · contract_size = balance · risk_per_trade
    /// and rounds down to the lot step. The result is always within
    /// `[min_lot, max_lot]`.
    pub fn lot_size(&self, entry: Decimal, stop_loss: Decimal, profile: &InstrumentProfile) -> Decimal {
        let raw = match self.config.method {
            SizingMethod::Fixed => self.config.fixed_lot,
            SizingMethod::RiskBased => {
                let loss_per_lot = (entry - stop_loss).abs() * profile.contract_size;
                if loss_per_lot.is_zero() {
                    // No stop distance: can't size by risk
                    return self.config.min_lot;
                }
                let risk_amount = self.config.balance * self.config.risk_per_trade;
                risk_amount / loss_per_lot
            }
        };

        self.apply_constraints(raw)
    }

    /// Round down to the lot step and clamp to the configured bounds.
    fn apply_constraints(&self, lots: Decimal) -> Decimal {
        let step = self.config.lot_step;
        let stepped = if step > Decimal::ZERO {
            (lots / step).round_dp_with_strategy(0, RoundingStrategy::ToZero) * step
        } else {
            lots
        };
        stepped.max(self.config.min_lot).min(self.config.max_lot).normalize()
    }
}
