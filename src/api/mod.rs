//! External collaborators: Yahoo market data and order gateways.

mod bridge_client;
mod data_client;
mod feed;
mod gateway;
mod types;

pub use bridge_client::BridgeClient;
pub use data_client::DataClient;
pub use feed::{DataError, MarketData};
pub use gateway::{ExecutionError, Gateway, OrderAck, OrderGateway, OrderRequest, PaperGateway};
