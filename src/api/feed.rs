//! Market data collaborator: recent bars and live quotes.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::models::{Bar, Quote};

/// Why a fetch produced no data. Every variant is recoverable: the
/// instrument is skipped for the current tick.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(String),

    #[error("no data for {instrument}")]
    NoData { instrument: String },

    #[error("response format changed: {0}")]
    Format(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
}

/// Source of bars and quotes.
pub trait MarketData {
    /// Up to `count` most recent bars, oldest first.
    fn recent_bars(
        &self,
        instrument: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<Bar>, DataError>> + Send;

    /// Current top-of-book quote.
    fn live_quote(&self, instrument: &str) -> impl Future<Output = Result<Quote, DataError>> + Send;
}
