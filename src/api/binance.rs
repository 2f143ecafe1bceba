use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use super::exchange::ExchangeClient;
use crate::error::EngineError;
use crate::models::{
    AccountSnapshot, BookLevel, Instrument, Kline, OrderAck, OrderBook, OrderRequest,
    PositionInfo, PositionSide, RestingOrder,
};
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// REST client for Binance USD-M futures (hedge mode)
///
/// Signed endpoints carry `timestamp` + `recvWindow` and an HMAC-SHA256
/// signature over the encoded query. Timestamps are corrected by the offset
/// measured in [`ExchangeClient::sync_time`].
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    time_offset_ms: Arc<AtomicI64>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoRaw {
    symbols: Vec<SymbolRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolRaw {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    contract_type: String,
    status: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRaw {
    total_wallet_balance: String,
    total_position_initial_margin: String,
    total_open_order_initial_margin: String,
    #[serde(default)]
    positions: Vec<PositionRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRaw {
    symbol: String,
    position_side: PositionSide,
    position_amt: String,
    unrealized_profit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRaw {
    order_id: i64,
    symbol: String,
    side: crate::models::OrderSide,
    position_side: PositionSide,
    orig_qty: String,
    price: String,
    update_time: i64,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    close_position: bool,
}

#[derive(Debug, Deserialize)]
struct DepthRaw {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAckRaw {
    order_id: i64,
    symbol: String,
    status: String,
}

// ============== Conversions ==============

fn parse_f64(field: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| EngineError::Parse(format!("{} = {:?}: {}", field, value, e)))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| EngineError::Parse(format!("{} = {:?}: {}", field, value, e)))
}

/// Pull a string field out of the filter with the given `filterType`
fn filter_value(filters: &[serde_json::Value], filter_type: &str, key: &str) -> Option<String> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
        .and_then(|f| f.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl TryFrom<SymbolRaw> for Instrument {
    type Error = EngineError;

    fn try_from(raw: SymbolRaw) -> Result<Self> {
        let tick = filter_value(&raw.filters, "PRICE_FILTER", "tickSize").ok_or_else(|| {
            EngineError::Parse(format!("{} has no PRICE_FILTER tickSize", raw.symbol))
        })?;
        let step = filter_value(&raw.filters, "LOT_SIZE", "stepSize").ok_or_else(|| {
            EngineError::Parse(format!("{} has no LOT_SIZE stepSize", raw.symbol))
        })?;

        Ok(Instrument {
            tick_size: parse_decimal("tickSize", &tick)?,
            step_size: parse_decimal("stepSize", &step)?,
            perpetual: raw.contract_type == "PERPETUAL",
            tradeable: raw.status == "TRADING",
            symbol: raw.symbol,
            base_asset: raw.base_asset,
            quote_asset: raw.quote_asset,
        })
    }
}

impl TryFrom<AccountRaw> for AccountSnapshot {
    type Error = EngineError;

    fn try_from(raw: AccountRaw) -> Result<Self> {
        let positions = raw
            .positions
            .into_iter()
            .map(|p| {
                Ok(PositionInfo {
                    quantity: parse_decimal("positionAmt", &p.position_amt)?,
                    unrealized_profit: parse_f64("unrealizedProfit", &p.unrealized_profit)?,
                    symbol: p.symbol,
                    position_side: p.position_side,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AccountSnapshot {
            wallet_balance: parse_f64("totalWalletBalance", &raw.total_wallet_balance)?,
            position_margin: parse_f64(
                "totalPositionInitialMargin",
                &raw.total_position_initial_margin,
            )?,
            order_margin: parse_f64(
                "totalOpenOrderInitialMargin",
                &raw.total_open_order_initial_margin,
            )?,
            positions,
        })
    }
}

impl TryFrom<OrderRaw> for RestingOrder {
    type Error = EngineError;

    fn try_from(raw: OrderRaw) -> Result<Self> {
        Ok(RestingOrder {
            quantity: parse_decimal("origQty", &raw.orig_qty)?,
            price: parse_decimal("price", &raw.price)?,
            order_id: raw.order_id,
            symbol: raw.symbol,
            side: raw.side,
            position_side: raw.position_side,
            update_time_ms: raw.update_time,
            reduce_only: raw.reduce_only || raw.close_position,
        })
    }
}

fn parse_levels(levels: Vec<(String, String)>) -> Result<Vec<BookLevel>> {
    levels
        .into_iter()
        .map(|(price, quantity)| {
            Ok(BookLevel {
                price: parse_decimal("depth price", &price)?,
                quantity: parse_decimal("depth qty", &quantity)?,
            })
        })
        .collect()
}

/// Kline rows are positional arrays: [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline(row: &serde_json::Value) -> Result<Kline> {
    let arr = row
        .as_array()
        .filter(|a| a.len() >= 7)
        .ok_or_else(|| EngineError::Parse(format!("malformed kline row: {}", row)))?;

    let close = arr[4]
        .as_str()
        .ok_or_else(|| EngineError::Parse("kline close".to_string()))
        .and_then(|c| parse_f64("kline close", c))?;
    let close_time_ms = arr[6]
        .as_i64()
        .ok_or_else(|| EngineError::Parse("kline close time".to_string()))?;

    Ok(Kline {
        close,
        close_time_ms,
    })
}

/// Hex HMAC-SHA256 of `payload` keyed by `secret`
pub fn sign_payload(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Config(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// ============== Implementation ==============

impl BinanceFuturesClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        recv_window_ms: u64,
        requests_per_second: u32,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            recv_window_ms,
            time_offset_ms: Arc::new(AtomicI64::new(0)),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| EngineError::Config(format!("bad exchange url: {}", e)))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Append timestamp, recvWindow and the signature over everything before it
    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.url(path, params)?;
        let timestamp = self.server_time_ms();
        url.query_pairs_mut()
            .append_pair("timestamp", &timestamp.to_string())
            .append_pair("recvWindow", &self.recv_window_ms.to_string());

        let payload = url.query().unwrap_or_default().to_string();
        let signature = sign_payload(&self.api_secret, &payload)?;
        url.query_pairs_mut().append_pair("signature", &signature);
        Ok(url)
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = self.url(path, params)?;
        self.rate_limiter.until_ready().await;
        let response = self.client.get(url).send().await?;
        read_json(response, false).await
    }

    /// `order_endpoint` routes exchange error bodies to `OrderRejected`
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        order_endpoint: bool,
    ) -> Result<T> {
        let url = self.signed_url(path, params)?;
        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        read_json(response, order_endpoint).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, order_endpoint: bool) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ApiError>(&body) {
            Ok(api) if order_endpoint => {
                EngineError::OrderRejected(format!("{} {}", api.code, api.msg))
            }
            Ok(api) => EngineError::TransientNetwork(format!(
                "Binance API error {}: {} {}",
                status, api.code, api.msg
            )),
            Err(_) => EngineError::TransientNetwork(format!("Binance API error: {}", status)),
        });
    }

    serde_json::from_str(&body).map_err(|e| EngineError::Parse(format!("Binance payload: {}", e)))
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.public("/fapi/v1/ping", &[]).await?;
        Ok(())
    }

    async fn sync_time(&self) -> Result<i64> {
        let before = Utc::now().timestamp_millis();
        let time: ServerTime = self.public("/fapi/v1/time", &[]).await?;
        let after = Utc::now().timestamp_millis();

        // Server stamp is taken mid-flight
        let local = before + (after - before) / 2;
        let offset = time.server_time - local;
        self.time_offset_ms.store(offset, Ordering::Relaxed);

        tracing::debug!(offset_ms = offset, "Synced exchange clock");
        Ok(offset)
    }

    fn server_time_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms()
    }

    async fn instruments(&self) -> Result<Vec<Instrument>> {
        let info: ExchangeInfoRaw = self.public("/fapi/v1/exchangeInfo", &[]).await?;
        let total = info.symbols.len();
        let instruments: Vec<Instrument> = info
            .symbols
            .into_iter()
            .filter_map(|raw| {
                let symbol = raw.symbol.clone();
                match Instrument::try_from(raw) {
                    Ok(instrument) => Some(instrument),
                    Err(e) => {
                        tracing::warn!(%symbol, error = %e, "Skipping symbol with bad metadata");
                        None
                    }
                }
            })
            .collect();
        tracing::debug!(total, parsed = instruments.len(), "Loaded exchange info");
        Ok(instruments)
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        let raw: AccountRaw = self
            .signed(Method::GET, "/fapi/v2/account", &[], false)
            .await?;
        AccountSnapshot::try_from(raw)
    }

    async fn open_orders(&self) -> Result<Vec<RestingOrder>> {
        let raw: Vec<OrderRaw> = self
            .signed(Method::GET, "/fapi/v1/openOrders", &[], false)
            .await?;
        raw.into_iter().map(RestingOrder::try_from).collect()
    }

    async fn order_book(&self, symbol: &str, limit: usize) -> Result<OrderBook> {
        let params = [("symbol", symbol.to_string()), ("limit", limit.to_string())];
        let raw: DepthRaw = self.public("/fapi/v1/depth", &params).await?;
        Ok(OrderBook {
            bids: parse_levels(raw.bids)?,
            asks: parse_levels(raw.asks)?,
        })
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<serde_json::Value> = self.public("/fapi/v1/klines", &params).await?;
        rows.iter().map(parse_kline).collect()
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("positionSide", order.position_side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("newClientOrderId", order.client_order_id.clone()),
        ];
        if let Some(price) = order.price {
            params.push(("price", price.normalize().to_string()));
        }
        if order.time_in_force.is_some() {
            params.push(("timeInForce", "GTC".to_string()));
        }

        let raw: OrderAckRaw = self
            .signed(Method::POST, "/fapi/v1/order", &params, true)
            .await?;
        Ok(OrderAck {
            order_id: raw.order_id,
            symbol: raw.symbol,
            status: raw.status,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()> {
        let params = [("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
        let _: serde_json::Value = self
            .signed(Method::DELETE, "/fapi/v1/order", &params, true)
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let params = [("symbol", symbol.to_string()), ("leverage", leverage.to_string())];
        let _: serde_json::Value = self
            .signed(Method::POST, "/fapi/v1/leverage", &params, true)
            .await?;
        Ok(())
    }
}
