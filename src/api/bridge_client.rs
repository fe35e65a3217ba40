//! HTTP client for a broker bridge that accepts market orders as JSON.
//!
//! The bridge sits next to the trading terminal and forwards orders to it.
//! It answers every POST with a `BridgeResponse`; `success: false` is a
//! broker-side rejection.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

use super::gateway::{ExecutionError, OrderAck, OrderGateway, OrderRequest};
use super::types::{BridgeOrder, BridgeResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Live order gateway.
pub struct BridgeClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl BridgeClient {
    /// Create a new bridge client.
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_wire(order: &OrderRequest) -> BridgeOrder {
        BridgeOrder {
            client_order_id: order.client_order_id.to_string(),
            symbol: order.instrument.clone(),
            side: order.side.as_str().to_string(),
            volume: order.lots,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            comment: order.comment.clone(),
        }
    }
}

impl OrderGateway for BridgeClient {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        let url = format!("{}/orders", self.base_url);
        debug!(url = %url, instrument = %order.instrument, "Posting order to bridge");

        let mut request = self.http.post(&url).json(&Self::to_wire(order));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout(DEFAULT_TIMEOUT)
            } else {
                ExecutionError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Transport(format!("{} - {}", status, body)));
        }

        let reply: BridgeResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Transport(format!("bad bridge response: {}", e)))?;

        if !reply.success {
            return Err(ExecutionError::Rejected(
                reply.error_msg.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        Ok(OrderAck {
            order_id: reply
                .ticket
                .unwrap_or_else(|| order.client_order_id.to_string()),
            fill_price: reply.price,
            simulated: false,
        })
    }
}
