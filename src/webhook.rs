//! HTTP endpoint that feeds external signals into the bot's inbox.
//!
//! `POST /signal` with `{"instrument": "EURUSD", "side": "buy"}` (optional
//! `price` and `note`) queues a signal for the next tick.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::inbox::{ExternalSignal, InboxSender};
use crate::models::Side;

/// Body of `POST /signal`.
#[derive(Debug, Deserialize)]
pub struct SignalPayload {
    pub instrument: String,
    /// BUY / SELL / LONG / SHORT, any case
    #[serde(alias = "action", alias = "direction")]
    pub side: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
}

pub fn router(inbox: InboxSender) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/signal", post(submit_signal))
        .with_state(inbox)
}

/// Serve the webhook until the process exits.
pub async fn serve(addr: SocketAddr, inbox: InboxSender) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Signal webhook listening on http://{}", addr);
    axum::serve(listener, router(inbox)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// POST /signal - queue an external signal
pub async fn submit_signal(
    State(inbox): State<InboxSender>,
    Json(payload): Json<SignalPayload>,
) -> (StatusCode, Json<Value>) {
    let Some(side) = Side::parse(&payload.side) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown side '{}'", payload.side)})),
        );
    };
    if payload.instrument.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "instrument is required"})),
        );
    }

    let mut signal = ExternalSignal::new(&payload.instrument, side);
    signal.reference_price = payload.price.filter(|p| *p > Decimal::ZERO);
    signal.note = payload.note;
    let instrument = signal.instrument.clone();

    match inbox.submit(signal) {
        Ok(()) => {
            info!(instrument = %instrument, side = %side, "External signal queued");
            (
                StatusCode::ACCEPTED,
                Json(json!({"queued": true, "instrument": instrument, "side": side})),
            )
        }
        Err(_) => {
            warn!(instrument = %instrument, "Inbox closed, dropping external signal");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "bot is not running"})),
            )
        }
    }
}
