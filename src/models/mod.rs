//! Data models for bars, instruments, signals, and positions.

mod bar;
mod instrument;
mod position;
mod signal;
mod trade;

pub use bar::{Bar, Quote};
pub use instrument::{InstrumentProfile, InstrumentSpec};
pub use position::{Position, PositionState};
pub use signal::{Direction, Gate, Signal, SignalSource};
pub use trade::{CloseReason, Side};
