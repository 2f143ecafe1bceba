//! In-memory exchange for unit tests; records every mutating call in order.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::exchange::ExchangeClient;
use crate::error::EngineError;
use crate::models::{
    AccountSnapshot, Instrument, Kline, OrderAck, OrderBook, OrderRequest, OrderType,
    RestingOrder,
};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Cancel { symbol: String, order_id: i64 },
    Place(OrderRequest),
    Leverage { symbol: String, leverage: u32 },
}

#[derive(Default)]
pub struct MockExchange {
    pub account: Mutex<Option<AccountSnapshot>>,
    pub orders: Mutex<Vec<RestingOrder>>,
    pub books: Mutex<HashMap<String, OrderBook>>,
    pub klines: Mutex<HashMap<String, Vec<Kline>>>,
    /// Symbols whose placements are refused
    pub reject: Mutex<HashSet<String>>,
    /// Symbols whose MARKET placements alone are refused
    pub reject_market: Mutex<HashSet<String>>,
    /// Symbols whose leverage updates fail
    pub fail_leverage: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<Call>>,
}

impl MockExchange {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Place(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn set_klines(&self, symbol: &str, closes: &[f64]) {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Kline {
                close: *close,
                close_time_ms: i as i64 * 300_000 + 299_999,
            })
            .collect();
        self.klines.lock().unwrap().insert(symbol.to_string(), bars);
    }

    pub fn set_book(&self, symbol: &str, book: OrderBook) {
        self.books.lock().unwrap().insert(symbol.to_string(), book);
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn sync_time(&self) -> Result<i64> {
        Ok(0)
    }

    async fn instruments(&self) -> Result<Vec<Instrument>> {
        Ok(Vec::new())
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        self.account
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::TransientNetwork("no account".into()))
    }

    async fn open_orders(&self) -> Result<Vec<RestingOrder>> {
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn order_book(&self, symbol: &str, _limit: usize) -> Result<OrderBook> {
        self.books
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::TransientNetwork(format!("no book for {}", symbol)))
    }

    async fn klines(&self, symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Kline>> {
        self.klines
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::TransientNetwork(format!("no klines for {}", symbol)))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if self.reject.lock().unwrap().contains(&order.symbol) {
            return Err(EngineError::OrderRejected("-2019 Margin is insufficient.".into()));
        }
        if order.order_type == OrderType::Market
            && self.reject_market.lock().unwrap().contains(&order.symbol)
        {
            return Err(EngineError::OrderRejected("-2022 ReduceOnly Order is rejected.".into()));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call::Place(order.clone()));
        Ok(OrderAck {
            order_id: calls.len() as i64,
            symbol: order.symbol.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Cancel {
            symbol: symbol.to_string(),
            order_id,
        });
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if self.fail_leverage.lock().unwrap().contains(symbol) {
            return Err(EngineError::OrderRejected("-4028 Leverage is not valid".into()));
        }
        self.calls.lock().unwrap().push(Call::Leverage {
            symbol: symbol.to_string(),
            leverage,
        });
        Ok(())
    }
}
