use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    AccountSnapshot, FlowSnapshot, Instrument, Kline, OrderAck, OrderBook, OrderRequest,
    RestingOrder,
};
use crate::Result;

/// Trading capability the engine is handed at construction
///
/// Every call is one blocking round trip bounded by the client's timeout.
/// Implementations never retry.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Cheap reachability probe used by the boot checks
    async fn ping(&self) -> Result<()>;

    /// Re-measure the local clock offset against exchange time; returns the
    /// offset in milliseconds (server - local)
    async fn sync_time(&self) -> Result<i64>;

    /// Current time on the exchange clock, in milliseconds
    fn server_time_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// All perpetual contracts with step/tick metadata
    async fn instruments(&self) -> Result<Vec<Instrument>>;

    async fn account(&self) -> Result<AccountSnapshot>;

    async fn open_orders(&self) -> Result<Vec<RestingOrder>>;

    async fn order_book(&self, symbol: &str, limit: usize) -> Result<OrderBook>;

    /// Most recent `limit` bars, oldest first; the last one may still be forming
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;
}

/// Capital-flow analytics source
#[async_trait]
pub trait FlowFeed: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// One snapshot per coin, in feed order
    async fn fetch_flows(&self) -> Result<Vec<FlowSnapshot>>;
}
