use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction chosen for a candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Hedge-mode leg holding exposure in this direction
    pub fn position_side(self) -> PositionSide {
        match self {
            Side::Long => PositionSide::Long,
            Side::Short => PositionSide::Short,
        }
    }

    /// Order side that adds exposure in this direction
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that removes exposure held in this direction
    pub fn exit_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    /// One-way mode leg; never produced by this engine
    Both,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Both => "BOTH",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    Gtc,
}

/// Tradeable perpetual contract metadata, loaded once at boot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub perpetual: bool,
    pub tradeable: bool,
}

/// Net capital flow for one coin over the 5m and 15m rolling windows
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub coin: String,
    pub side: Side,
    pub m5_net: f64,
    pub m15_net: f64,
}

impl FlowSnapshot {
    /// Long when the 5-minute inflow beats `inflow_threshold`, short otherwise
    pub fn new(coin: impl Into<String>, m5_net: f64, m15_net: f64, inflow_threshold: f64) -> Self {
        let side = if m5_net > inflow_threshold {
            Side::Long
        } else {
            Side::Short
        };
        Self {
            coin: coin.into(),
            side,
            m5_net,
            m15_net,
        }
    }

    pub fn symbol(&self, quote_asset: &str) -> String {
        format!("{}{}", self.coin, quote_asset)
    }
}

/// One exchange bar; only the close feeds the indicators
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub close: f64,
    /// Last millisecond of the bar, on the exchange clock
    pub close_time_ms: i64,
}

/// Which filter rule let a candidate through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifyingRule {
    Volume,
    Oscillator,
}

/// Instrument selected for action this cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub coin: String,
    pub side: Side,
    pub m5_net: f64,
    pub m15_net: f64,
    pub crsi: f64,
    pub rule: QualifyingRule,
}

/// One hedge-mode position leg
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub symbol: String,
    pub position_side: PositionSide,
    /// Signed: negative for short legs on the wire
    pub quantity: Decimal,
    pub unrealized_profit: f64,
}

impl PositionInfo {
    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub wallet_balance: f64,
    pub position_margin: f64,
    pub order_margin: f64,
    pub positions: Vec<PositionInfo>,
}

impl AccountSnapshot {
    pub fn used_margin(&self) -> f64 {
        self.position_margin + self.order_margin
    }

    pub fn position(&self, symbol: &str, side: PositionSide) -> Option<&PositionInfo> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.position_side == side)
    }
}

/// Working order on the book
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub update_time_ms: i64,
    /// Reduce-only or close-position order; never opens exposure
    pub reduce_only: bool,
}

impl RestingOrder {
    /// Hedge-mode entry: BUY on the long leg or SELL on the short leg
    pub fn is_entry(&self) -> bool {
        !self.reduce_only
            && matches!(
                (self.side, self.position_side),
                (OrderSide::Buy, PositionSide::Long) | (OrderSide::Sell, PositionSide::Short)
            )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth snapshot: bids best-first (descending), asks best-first (ascending)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Price `depth` levels away from the touch (1 = best) on the side a
    /// passive order of `side` would rest on
    pub fn passive_price(&self, side: OrderSide, depth: usize) -> Option<Decimal> {
        let levels = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        depth
            .checked_sub(1)
            .and_then(|idx| levels.get(idx))
            .map(|level| level.price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Resting GTC limit order
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        position_side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            client_order_id: new_client_order_id(),
        }
    }

    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        position_side: PositionSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            position_side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
            client_order_id: new_client_order_id(),
        }
    }
}

/// Exchange caps client ids at 36 chars; a simple v4 uuid fits
fn new_client_order_id() -> String {
    format!("fb-{}", Uuid::new_v4().simple())
        .chars()
        .take(36)
        .collect()
}

/// Acknowledgement returned after a successful placement
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
}
