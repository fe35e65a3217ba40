//! Execution collaborator: order submission without retries.

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::Side;

use super::bridge_client::BridgeClient;

/// Market order for a newly opened position.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub lots: Decimal,
    pub stop_loss: Decimal,
    /// First take-profit level; later targets are managed locally
    pub take_profit: Decimal,
    pub comment: String,
}

/// Broker acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub fill_price: Option<Decimal>,
    pub simulated: bool,
}

/// Why an order was not acknowledged. Never rolls back the position.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Something that can take an order.
pub trait OrderGateway {
    fn name(&self) -> &'static str;

    fn submit(
        &self,
        order: &OrderRequest,
    ) -> impl Future<Output = Result<OrderAck, ExecutionError>> + Send;
}

/// Acknowledges every order without contacting anyone.
#[derive(Debug, Clone, Default)]
pub struct PaperGateway;

impl OrderGateway for PaperGateway {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        info!(
            instrument = %order.instrument,
            side = %order.side,
            lots = %order.lots,
            sl = %order.stop_loss,
            tp = %order.take_profit,
            "[PAPER] Order filled"
        );
        Ok(OrderAck {
            order_id: format!("paper-{}", order.client_order_id),
            fill_price: None,
            simulated: true,
        })
    }
}

/// Gateway selected by the trading mode.
pub enum Gateway {
    Paper(PaperGateway),
    Bridge(BridgeClient),
}

impl OrderGateway for Gateway {
    fn name(&self) -> &'static str {
        match self {
            Gateway::Paper(g) => g.name(),
            Gateway::Bridge(g) => g.name(),
        }
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
        match self {
            Gateway::Paper(g) => g.submit(order).await,
            Gateway::Bridge(g) => g.submit(order).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_gateway_always_acks() {
        let order = OrderRequest {
            client_order_id: Uuid::new_v4(),
            instrument: "EURUSD".to_string(),
            side: Side::Buy,
            lots: dec!(0.1),
            stop_loss: dec!(1.0985),
            take_profit: dec!(1.1010),
            comment: "test".to_string(),
        };
        let gateway = Gateway::Paper(PaperGateway);
        let ack = gateway.submit(&order).await.unwrap();
        assert!(ack.simulated);
        assert!(ack.order_id.starts_with("paper-"));
        assert_eq!(gateway.name(), "paper");
    }
}
