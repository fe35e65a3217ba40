//! Queue of externally submitted signals, drained by the bot at the start of
//! every tick.
//!
//! Producers (the webhook, tests) only ever enqueue; positions are mutated by
//! the evaluation loop alone.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::Side;

/// A directional signal that did not come from the indicator pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSignal {
    pub instrument: String,
    pub side: Side,
    /// Entry reference; the bar close is used when absent
    #[serde(default)]
    pub reference_price: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl ExternalSignal {
    pub fn new(instrument: &str, side: Side) -> Self {
        Self {
            instrument: normalize_symbol(instrument),
            side,
            reference_price: None,
            note: None,
            received_at: Utc::now(),
        }
    }
}

/// `eur/usd` → `EURUSD`
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Cloneable producer handle.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::UnboundedSender<ExternalSignal>,
}

impl InboxSender {
    /// Enqueue a signal. Fails only when the bot has shut down.
    pub fn submit(&self, mut signal: ExternalSignal) -> Result<(), ExternalSignal> {
        signal.instrument = normalize_symbol(&signal.instrument);
        self.tx.send(signal).map_err(|e| e.0)
    }
}

/// Consumer side, owned by the bot.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<ExternalSignal>,
}

impl Inbox {
    /// Take everything queued so far without waiting.
    pub fn drain(&mut self) -> Vec<ExternalSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.rx.try_recv() {
            signals.push(signal);
        }
        signals
    }
}

pub fn inbox() -> (InboxSender, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboxSender { tx }, Inbox { rx })
}
