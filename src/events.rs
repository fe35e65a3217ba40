//! Reporting events and the task that logs and journals them.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{Position, PositionState, SignalSource};
use crate::trading::{PositionEvent, TargetMethod};

/// Everything the bot reports about positions and signals.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    PositionOpened {
        position: Position,
        method: TargetMethod,
        source: SignalSource,
        reasons: Vec<String>,
    },
    TargetHit {
        position_id: Uuid,
        instrument: String,
        index: usize,
        level: Decimal,
        price: Decimal,
    },
    StateChanged {
        position_id: Uuid,
        instrument: String,
        from: PositionState,
        to: PositionState,
    },
    PartialClose {
        position_id: Uuid,
        instrument: String,
        lots: Decimal,
        price: Decimal,
        pnl: Decimal,
    },
    /// Periodic mark of an open position at the latest price.
    PositionMarked {
        position: Position,
        price: Decimal,
        floating_pnl: Decimal,
        floating_pips: Decimal,
    },
    PositionClosed {
        position: Position,
    },
    ExecutionFailed {
        position_id: Uuid,
        instrument: String,
        error: String,
    },
    SignalRejected {
        instrument: String,
        reason: String,
    },
}

impl TradeEvent {
    /// Lift a lifecycle event into a reporting event. `Closed` is reported
    /// separately with the final position, so it maps to `None`.
    pub fn from_lifecycle(position: &Position, event: &PositionEvent) -> Option<Self> {
        let position_id = position.id;
        let instrument = position.instrument.clone();
        match *event {
            PositionEvent::TargetHit { index, level, price } => Some(TradeEvent::TargetHit {
                position_id,
                instrument,
                index,
                level,
                price,
            }),
            PositionEvent::StateChanged { from, to } => Some(TradeEvent::StateChanged {
                position_id,
                instrument,
                from,
                to,
            }),
            PositionEvent::PartialClose { lots, price, pnl } => Some(TradeEvent::PartialClose {
                position_id,
                instrument,
                lots,
                price,
                pnl,
            }),
            PositionEvent::Closed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TradeEvent::PositionOpened { .. } => "position_opened",
            TradeEvent::TargetHit { .. } => "target_hit",
            TradeEvent::StateChanged { .. } => "state_changed",
            TradeEvent::PartialClose { .. } => "partial_close",
            TradeEvent::PositionMarked { .. } => "position_marked",
            TradeEvent::PositionClosed { .. } => "position_closed",
            TradeEvent::ExecutionFailed { .. } => "execution_failed",
            TradeEvent::SignalRejected { .. } => "signal_rejected",
        }
    }

    pub fn instrument(&self) -> &str {
        match self {
            TradeEvent::PositionOpened { position, .. }
            | TradeEvent::PositionMarked { position, .. }
            | TradeEvent::PositionClosed { position } => &position.instrument,
            TradeEvent::TargetHit { instrument, .. }
            | TradeEvent::StateChanged { instrument, .. }
            | TradeEvent::PartialClose { instrument, .. }
            | TradeEvent::ExecutionFailed { instrument, .. }
            | TradeEvent::SignalRejected { instrument, .. } => instrument,
        }
    }

    /// The position snapshot carried by the event, if any.
    pub fn position(&self) -> Option<&Position> {
        match self {
            TradeEvent::PositionOpened { position, .. }
            | TradeEvent::PositionMarked { position, .. }
            | TradeEvent::PositionClosed { position } => Some(position),
            _ => None,
        }
    }
}

/// Producer handle for trade events. Sending never blocks and never fails
/// the caller.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TradeEvent>,
}

impl EventSink {
    pub fn emit(&self, event: TradeEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event reporter stopped, dropping event");
        }
    }
}

pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<TradeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Consume events until every sink is dropped: log each one and, when a
/// journal is configured, persist it.
pub async fn run_reporter(mut rx: mpsc::UnboundedReceiver<TradeEvent>, db: Option<Database>) {
    while let Some(event) = rx.recv().await {
        log_event(&event);

        if let Some(db) = &db {
            if let Err(e) = db.record_event(&event).await {
                warn!(error = %e, kind = event.kind(), "Failed to journal event");
            }
        }
    }
    debug!("Event reporter finished");
}

fn log_event(event: &TradeEvent) {
    match event {
        TradeEvent::PositionOpened {
            position,
            method,
            source,
            ..
        } => info!(
            instrument = %position.instrument,
            side = %position.side,
            entry = %position.entry_price,
            lots = %position.lot_size,
            sl = %position.stop_loss,
            targets = ?position.targets,
            method = ?method,
            source = ?source,
            "Position opened"
        ),
        TradeEvent::TargetHit {
            instrument,
            index,
            level,
            price,
            ..
        } => info!(
            instrument = %instrument,
            target = index + 1,
            level = %level,
            price = %price,
            "Target hit"
        ),
        TradeEvent::StateChanged {
            instrument, from, to, ..
        } => info!(instrument = %instrument, from = %from, to = %to, "Position state changed"),
        TradeEvent::PartialClose {
            instrument,
            lots,
            price,
            pnl,
            ..
        } => info!(
            instrument = %instrument,
            lots = %lots,
            price = %price,
            pnl = %pnl.round_dp(2),
            "Partial close"
        ),
        TradeEvent::PositionMarked {
            position,
            price,
            floating_pnl,
            floating_pips,
        } => debug!(
            instrument = %position.instrument,
            state = %position.state,
            price = %price,
            pips = %floating_pips.round_dp(1),
            pnl = %floating_pnl.round_dp(2),
            "Position marked"
        ),
        TradeEvent::PositionClosed { position } => info!(
            instrument = %position.instrument,
            reason = ?position.close_reason,
            close = ?position.close_price,
            pnl = %position.realized_pnl.round_dp(2),
            "Position closed"
        ),
        TradeEvent::ExecutionFailed {
            instrument, error, ..
        } => error!(instrument = %instrument, error = %error, "Order execution failed"),
        TradeEvent::SignalRejected { instrument, reason } => {
            debug!(instrument = %instrument, reason = %reason, "Signal not taken")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentProfile, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(
            &InstrumentProfile::for_symbol("EURUSD"),
            Side::Buy,
            dec!(1.1000),
            dec!(0.1),
            dec!(1.0990),
            vec![dec!(1.1005), dec!(1.1010), dec!(1.1015)],
            Utc::now(),
        )
    }

    #[test]
    fn test_lifecycle_events_are_lifted() {
        let pos = position();
        let hit = PositionEvent::TargetHit {
            index: 0,
            level: dec!(1.1005),
            price: dec!(1.1006),
        };
        let event = TradeEvent::from_lifecycle(&pos, &hit).unwrap();
        assert_eq!(event.kind(), "target_hit");
        assert_eq!(event.instrument(), "EURUSD");

        let closed = PositionEvent::Closed {
            reason: crate::models::CloseReason::StopLoss,
            price: dec!(1.0990),
            pnl: dec!(-10),
        };
        assert!(TradeEvent::from_lifecycle(&pos, &closed).is_none());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = TradeEvent::SignalRejected {
            instrument: "GBPUSD".to_string(),
            reason: "position already open".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signal_rejected");
        assert_eq!(json["instrument"], "GBPUSD");
    }

    #[tokio::test]
    async fn test_reporter_drains_until_sinks_dropped() {
        let (sink, rx) = channel();
        sink.emit(TradeEvent::PositionClosed {
            position: position(),
        });
        drop(sink);
        // Returns once the channel is closed and empty
        run_reporter(rx, None).await;
    }
}
