pub mod binance;
pub mod coinank;
pub mod exchange;
#[cfg(test)]
pub mod mock;

use std::time::Duration;

use reqwest::Client;

use crate::error::EngineError;
use crate::Result;

pub use binance::BinanceFuturesClient;
pub use coinank::CoinankClient;
pub use exchange::{ExchangeClient, FlowFeed};

/// Shared HTTP client for both adapters, bounded by `timeout_secs` and
/// optionally routed through `proxy`
pub fn build_http_client(timeout_secs: u64, proxy: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(timeout_secs));

    if let Some(url) = proxy.filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| EngineError::Config(format!("invalid proxy {}: {}", url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| EngineError::Config(format!("http client: {}", e)))
}
