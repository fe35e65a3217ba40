//! Staged-exit lifecycle: OPEN → PARTIAL → BREAKEVEN → CLOSED.
//!
//! [`on_price_update`] is the only way a position's exit state changes. It is
//! synchronous and touches nothing but the position it is given, so a call
//! is never left half-applied.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::config::{ExitPriority, LifecycleConfig};
use crate::models::{CloseReason, Position, PositionState};

/// Something that happened to a position during one price update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionEvent {
    TargetHit {
        index: usize,
        level: Decimal,
        price: Decimal,
    },
    StateChanged {
        from: PositionState,
        to: PositionState,
    },
    /// Part of the position was closed at a target.
    PartialClose {
        lots: Decimal,
        price: Decimal,
        pnl: Decimal,
    },
    Closed {
        reason: CloseReason,
        price: Decimal,
        /// Total realized P&L of the position, partials included
        pnl: Decimal,
    },
}

/// Apply one price observation to `position`.
///
/// Closed positions are left untouched. Targets are checked in index order;
/// a reached target is never un-reached. With [`ExitPriority::StopFirst`] a
/// stop crossing closes the position before any target is looked at.
pub fn on_price_update(
    position: &mut Position,
    price: Decimal,
    now: DateTime<Utc>,
    config: &LifecycleConfig,
) -> Vec<PositionEvent> {
    let mut events = Vec::new();
    if position.is_closed() {
        return events;
    }
    position.last_price = price;

    match config.exit_priority {
        ExitPriority::StopFirst => {
            if position.stop_crossed(price) {
                close(position, price, now, CloseReason::StopLoss, &mut events);
                return events;
            }
            check_targets(position, price, now, config, &mut events);
        }
        ExitPriority::TargetsFirst => {
            check_targets(position, price, now, config, &mut events);
            if !position.is_closed() && position.stop_crossed(price) {
                close(position, price, now, CloseReason::StopLoss, &mut events);
            }
        }
    }

    events
}

fn check_targets(
    position: &mut Position,
    price: Decimal,
    now: DateTime<Utc>,
    config: &LifecycleConfig,
    events: &mut Vec<PositionEvent>,
) {
    let last = position.targets.len().saturating_sub(1);

    for index in 0..position.targets.len() {
        if position.is_target_hit(index) {
            continue;
        }
        if !position.target_crossed(index, price) {
            // Levels are monotonic: nothing further out can be crossed either.
            break;
        }

        position.targets_hit.insert(index);
        events.push(PositionEvent::TargetHit {
            index,
            level: position.targets[index],
            price,
        });

        if index == last {
            close(position, price, now, CloseReason::FinalTarget, events);
            return;
        }

        if config.partial_close && index == config.partial_target {
            let lots = partial_lots(position.lot_size, config);
            // A position already at the minimum step keeps its full size
            if lots > Decimal::ZERO {
                let pnl = position.pnl_for(price, lots);
                position.lot_size -= lots;
                position.realized_pnl += pnl;
                events.push(PositionEvent::PartialClose { lots, price, pnl });
            }
            advance(position, PositionState::Partial, events);
        }

        if config.breakeven && index == config.breakeven_target {
            position.stop_loss = position.entry_price;
            advance(position, PositionState::Breakeven, events);
        }
    }
}

/// Size closed at the partial target, rounded down to the lot step.
fn partial_lots(lot_size: Decimal, config: &LifecycleConfig) -> Decimal {
    let raw = lot_size * config.partial_fraction;
    let step = config.partial_lot_step;
    if step <= Decimal::ZERO {
        return raw;
    }
    ((raw / step).round_dp_with_strategy(0, RoundingStrategy::ToZero) * step).normalize()
}

fn close(
    position: &mut Position,
    price: Decimal,
    now: DateTime<Utc>,
    reason: CloseReason,
    events: &mut Vec<PositionEvent>,
) {
    position.realized_pnl += position.pnl_for(price, position.lot_size);
    position.close_price = Some(price);
    position.closed_at = Some(now);
    position.close_reason = Some(reason);
    advance(position, PositionState::Closed, events);
    events.push(PositionEvent::Closed {
        reason,
        price,
        pnl: position.realized_pnl,
    });
}

/// Move forward only; a later state is never replaced by an earlier one.
fn advance(position: &mut Position, to: PositionState, events: &mut Vec<PositionEvent>) {
    if to > position.state {
        events.push(PositionEvent::StateChanged {
            from: position.state,
            to,
        });
        position.state = to;
    }
}
