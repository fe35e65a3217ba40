//! Trading logic: signal classification, target levels, position lifecycle,
//! sizing.

mod book;
mod classifier;
mod config;
mod lifecycle;
mod position_sizer;
mod targets;

pub use book::PositionBook;
pub use classifier::{classify, external_signal};
pub use config::{ConfigError, MomentumRule, StrategyConfig};
pub(crate) use config::is_strictly_increasing_positive;
pub use lifecycle::PositionEvent;
pub use position_sizer::PositionSizer;
pub use targets::{compute_targets, TargetLevels, TargetMethod};
