use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowbot::config::Settings;
use flowbot::discovery::build_universe;
use flowbot::{
    AccountSnapshot, BookLevel, EngineError, ExchangeClient, FlowFeed, FlowSnapshot, Instrument,
    Kline, OrderAck, OrderBook, OrderRequest, OrderSide, OrderType, PositionInfo, PositionSide,
    RestingOrder, TradingEngine,
};
use rust_decimal::Decimal;

const NOW: i64 = 1_700_000_000_000;

// ============================================================================
// In-memory exchange and feed
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Account,
    OpenOrders,
    Cancel(i64),
    Leverage(String),
    Place(OrderRequest),
}

#[derive(Default)]
struct FakeExchange {
    account: Option<AccountSnapshot>,
    orders: Vec<RestingOrder>,
    books: HashMap<String, OrderBook>,
    klines: HashMap<String, Vec<Kline>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeExchange {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn placed(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Place(req) => Some(req),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn ping(&self) -> flowbot::Result<()> {
        Ok(())
    }

    async fn sync_time(&self) -> flowbot::Result<i64> {
        Ok(0)
    }

    async fn instruments(&self) -> flowbot::Result<Vec<Instrument>> {
        Ok(instruments())
    }

    async fn account(&self) -> flowbot::Result<AccountSnapshot> {
        self.record(Call::Account);
        self.account
            .clone()
            .ok_or_else(|| EngineError::TransientNetwork("account unavailable".into()))
    }

    async fn open_orders(&self) -> flowbot::Result<Vec<RestingOrder>> {
        self.record(Call::OpenOrders);
        Ok(self.orders.clone())
    }

    async fn order_book(&self, symbol: &str, _limit: usize) -> flowbot::Result<OrderBook> {
        self.books
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::TransientNetwork(format!("no book for {}", symbol)))
    }

    async fn klines(&self, symbol: &str, _interval: &str, _limit: usize) -> flowbot::Result<Vec<Kline>> {
        self.klines
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::TransientNetwork(format!("no klines for {}", symbol)))
    }

    async fn place_order(&self, order: &OrderRequest) -> flowbot::Result<OrderAck> {
        self.record(Call::Place(order.clone()));
        Ok(OrderAck {
            order_id: 1000 + self.placed().len() as i64,
            symbol: order.symbol.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: i64) -> flowbot::Result<()> {
        self.record(Call::Cancel(order_id));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, _leverage: u32) -> flowbot::Result<()> {
        self.record(Call::Leverage(symbol.to_string()));
        Ok(())
    }
}

struct FakeFeed {
    flows: Option<Vec<FlowSnapshot>>,
}

#[async_trait]
impl FlowFeed for FakeFeed {
    async fn ping(&self) -> flowbot::Result<()> {
        Ok(())
    }

    async fn fetch_flows(&self) -> flowbot::Result<Vec<FlowSnapshot>> {
        self.flows
            .clone()
            .ok_or_else(|| EngineError::Parse("fund flow payload has no data".into()))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn instruments() -> Vec<Instrument> {
    ["BTC", "ETH", "SOL", "XRP", "LUNA"]
        .iter()
        .map(|coin| Instrument {
            symbol: format!("{}USDT", coin),
            base_asset: coin.to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: dec("0.01"),
            step_size: dec("0.001"),
            perpetual: true,
            tradeable: true,
        })
        .collect()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.strategy.blacklist = vec!["LUNA".to_string()];
    settings.trading.price_depth = 1;
    settings.trading.amount = 100.0;
    settings
}

/// Alternating closes keep CRSI near 50, clear of both oscillator levels
fn neutral_klines() -> Vec<Kline> {
    (0..202)
        .map(|i| Kline {
            close: if i % 2 == 0 { 100.0 } else { 101.0 },
            // Bar 201 is still forming at NOW
            close_time_ms: NOW + (i - 200) * 300_000 - 1,
        })
        .collect()
}

fn book(bid: &str, ask: &str) -> OrderBook {
    OrderBook {
        bids: vec![BookLevel {
            price: dec(bid),
            quantity: Decimal::ONE,
        }],
        asks: vec![BookLevel {
            price: dec(ask),
            quantity: Decimal::ONE,
        }],
    }
}

fn flows() -> Vec<FlowSnapshot> {
    let threshold = 500_000.0;
    vec![
        // Accelerating inflow: long via the volume rule
        FlowSnapshot::new("BTC", 800_000.0, 2_000_000.0, threshold),
        FlowSnapshot::new("SOL", 100_000.0, 50_000.0, threshold),
        FlowSnapshot::new("XRP", -10_000.0, -5_000.0, threshold),
        // Accelerating outflow: short via the volume rule
        FlowSnapshot::new("ETH", -900_000.0, -2_000_000.0, threshold),
        // Blacklisted and unknown coins never reach the ranker
        FlowSnapshot::new("LUNA", 9_000_000.0, 9_000_000.0, threshold),
        FlowSnapshot::new("PEPE", -9_000_000.0, -9_000_000.0, threshold),
    ]
}

fn exchange() -> FakeExchange {
    let mut exchange = FakeExchange {
        account: Some(AccountSnapshot {
            wallet_balance: 1000.0,
            position_margin: 100.0,
            order_margin: 20.0,
            positions: vec![PositionInfo {
                symbol: "ETHUSDT".to_string(),
                position_side: PositionSide::Long,
                quantity: dec("0.5"),
                unrealized_profit: 12.0,
            }],
        }),
        orders: vec![RestingOrder {
            order_id: 77,
            symbol: "XRPUSDT".to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            quantity: dec("10"),
            price: dec("0.5"),
            update_time_ms: NOW - 600_000,
            reduce_only: false,
        }],
        ..FakeExchange::default()
    };
    for coin in ["BTC", "ETH", "SOL", "XRP"] {
        exchange
            .klines
            .insert(format!("{}USDT", coin), neutral_klines());
    }
    exchange.books.insert("BTCUSDT".to_string(), book("40000.00", "40000.10"));
    exchange.books.insert("ETHUSDT".to_string(), book("2000.00", "2000.05"));
    exchange
}

fn engine(exchange: Arc<FakeExchange>, feed: FakeFeed, settings: &Settings) -> TradingEngine {
    let universe = Arc::new(build_universe(instruments(), settings));
    TradingEngine::new(exchange, Arc::new(feed), universe, settings)
}

// ============================================================================
// Full cycles
// ============================================================================

#[tokio::test]
async fn test_full_cycle_opens_flips_and_sweeps() {
    let settings = settings();
    let exchange = Arc::new(exchange());
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(flows()) }, &settings);

    let outcome = engine.run_cycle(NOW).await.unwrap();

    assert_eq!(outcome.flows, 4);
    assert_eq!(outcome.ranked, 4);
    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.actions, 2);
    assert_eq!(outcome.report.cancelled, 1);
    assert_eq!(outcome.report.placed, 3);
    assert_eq!(outcome.report.failed, 0);

    let calls = exchange.calls();
    let first_mutation = calls
        .iter()
        .position(|c| matches!(c, Call::Cancel(_) | Call::Place(_) | Call::Leverage(_)))
        .unwrap();
    assert_eq!(calls[first_mutation], Call::Cancel(77), "stale order swept first");

    let placed = exchange.placed();
    assert_eq!(placed.len(), 3);

    // BTC: passive long entry at the best bid, 100 / 40000 floored to 0.001
    let btc = placed.iter().find(|o| o.symbol == "BTCUSDT").unwrap();
    assert_eq!(btc.order_type, OrderType::Limit);
    assert_eq!(btc.side, OrderSide::Buy);
    assert_eq!(btc.position_side, PositionSide::Long);
    assert_eq!(btc.price, Some(dec("40000.00")));
    assert_eq!(btc.quantity, dec("0.002"));

    // ETH: market close of the long leg, then a passive short entry
    let eth: Vec<&OrderRequest> = placed.iter().filter(|o| o.symbol == "ETHUSDT").collect();
    assert_eq!(eth.len(), 2);
    assert_eq!(eth[0].order_type, OrderType::Market);
    assert_eq!(eth[0].side, OrderSide::Sell);
    assert_eq!(eth[0].position_side, PositionSide::Long);
    assert_eq!(eth[0].quantity, dec("0.5"));
    assert_eq!(eth[1].order_type, OrderType::Limit);
    assert_eq!(eth[1].position_side, PositionSide::Short);
    assert_eq!(eth[1].price, Some(dec("2000.05")));
    assert_eq!(eth[1].quantity, dec("0.049"));

    // Leverage precedes every entry leg
    let eth_leverage = calls
        .iter()
        .position(|c| *c == Call::Leverage("ETHUSDT".to_string()))
        .unwrap();
    let eth_close = calls
        .iter()
        .position(|c| matches!(c, Call::Place(o) if o.symbol == "ETHUSDT"))
        .unwrap();
    assert!(eth_leverage < eth_close);
}

#[tokio::test]
async fn test_margin_cap_blocks_all_submissions() {
    let settings = settings();
    let mut fake = exchange();
    if let Some(account) = fake.account.as_mut() {
        account.position_margin = 450.0;
        account.order_margin = 100.0;
    }
    let exchange = Arc::new(fake);
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(flows()) }, &settings);

    let result = engine.run_cycle(NOW).await;

    assert!(matches!(result, Err(EngineError::MarginExceeded { .. })));
    assert_eq!(exchange.calls(), vec![Call::Account]);
}

#[tokio::test]
async fn test_profit_exit_holds_losing_opposite_leg() {
    let mut settings = settings();
    settings.trading.profit_exit = 15.0;
    let exchange = Arc::new(exchange());
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(flows()) }, &settings);

    let outcome = engine.run_cycle(NOW).await.unwrap();

    // ETH leg is up 12, short of the 15 exit; only BTC opens
    assert_eq!(outcome.actions, 1);
    let placed = exchange.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].symbol, "BTCUSDT");
}

#[tokio::test]
async fn test_bidirectional_opens_without_touching_opposite_leg() {
    let mut settings = settings();
    settings.trading.bidirectional = true;
    let exchange = Arc::new(exchange());
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(flows()) }, &settings);

    let outcome = engine.run_cycle(NOW).await.unwrap();

    assert_eq!(outcome.actions, 1);
    assert!(exchange
        .placed()
        .iter()
        .all(|o| o.order_type == OrderType::Limit && o.symbol == "BTCUSDT"));
}

#[tokio::test]
async fn test_insufficient_flows_abort_before_account_read() {
    let settings = settings();
    let exchange = Arc::new(exchange());
    let few = flows().into_iter().take(3).collect();
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(few) }, &settings);

    let result = engine.run_cycle(NOW).await;

    assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn test_feed_parse_error_aborts_cycle() {
    let settings = settings();
    let exchange = Arc::new(exchange());
    let engine = engine(exchange.clone(), FakeFeed { flows: None }, &settings);

    let err = engine.run_cycle(NOW).await.unwrap_err();

    assert!(matches!(err, EngineError::Parse(_)));
    assert!(err.aborts_cycle());
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn test_quiet_market_finishes_without_orders() {
    let settings = settings();
    let exchange = Arc::new(exchange());
    let threshold = settings.strategy.side_inflow_threshold;
    let quiet = ["BTC", "ETH", "SOL", "XRP"]
        .iter()
        .enumerate()
        .map(|(i, coin)| FlowSnapshot::new(*coin, i as f64 * 1000.0, 0.0, threshold))
        .collect();
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(quiet) }, &settings);

    let outcome = engine.run_cycle(NOW).await.unwrap();

    assert_eq!(outcome.candidates, 0);
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn test_second_cycle_does_not_duplicate_resting_entry() {
    let settings = settings();
    let mut fake = exchange();
    // BTC entry from an earlier cycle is still fresh on the book
    fake.orders.push(RestingOrder {
        order_id: 5,
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Buy,
        position_side: PositionSide::Long,
        quantity: dec("0.002"),
        price: dec("39990.00"),
        update_time_ms: NOW - 30_000,
        reduce_only: false,
    });
    let exchange = Arc::new(fake);
    let engine = engine(exchange.clone(), FakeFeed { flows: Some(flows()) }, &settings);

    let outcome = engine.run_cycle(NOW).await.unwrap();

    assert_eq!(outcome.report.skipped, 1);
    assert!(exchange.placed().iter().all(|o| o.symbol != "BTCUSDT"));
}
