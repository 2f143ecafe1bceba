//! Layered runtime configuration.
//!
//! Defaults, then an optional TOML file, then `FLOWBOT__SECTION__KEY`
//! environment variables. Loaded once at boot and shared read-only.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::Result;

pub const DEFAULT_CONFIG_PATH: &str = "config/flowbot.toml";
const ENV_PREFIX: &str = "FLOWBOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub flow: FlowSettings,
    pub strategy: StrategySettings,
    pub trading: TradingSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    /// Upper bound for every HTTP round trip
    pub timeout_secs: u64,
    pub proxy: Option<String>,
    pub requests_per_second: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            timeout_secs: 360,
            proxy: None,
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    pub base_url: String,
    /// Static part of the time-embedded feed token
    pub token_seed: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            base_url: "https://coinank.com".to_string(),
            token_seed: "-b31e-c547-d299-b6d07b7631aba2c903cca2c903cc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    /// Instruments taken from each end of the flow ranking
    pub max_coins: usize,
    /// m5 net flow above this marks a coin long
    pub side_inflow_threshold: f64,
    pub buy_net_amount: f64,
    pub sell_net_amount: f64,
    pub multiple_net_amount: f64,
    pub narrow_by_threshold: bool,
    pub rsi_length: usize,
    pub rsi_level: f64,
    pub kline_interval: String,
    pub kline_limit: usize,
    pub blacklist: Vec<String>,
    pub quote_asset: String,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            max_coins: 2,
            side_inflow_threshold: 500_000.0,
            buy_net_amount: 500_000.0,
            sell_net_amount: 500_000.0,
            multiple_net_amount: 1.5,
            narrow_by_threshold: false,
            rsi_length: 6,
            rsi_level: 20.0,
            kline_interval: "5m".to_string(),
            kline_limit: 202,
            blacklist: Vec::new(),
            quote_asset: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Quote notional per entry order
    pub amount: f64,
    pub leverage: u32,
    /// Max (position + order margin) / wallet before opening is blocked
    pub margin_utilization_rate: f64,
    /// 1-based order book level used for passive limit prices
    pub price_depth: usize,
    pub book_limit: usize,
    pub orders_timeout_secs: u64,
    /// Minimum unrealized profit on the opposing leg before a flip (0 = off)
    pub profit_exit: f64,
    pub bidirectional: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            amount: 20.0,
            leverage: 10,
            margin_utilization_rate: 0.5,
            price_depth: 5,
            book_limit: 50,
            orders_timeout_secs: 300,
            profit_exit: 0.0,
            bidirectional: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cycle_interval_secs: u64,
    pub time_sync_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            time_sync_interval_secs: 300,
        }
    }
}

impl Settings {
    /// Load defaults, then `path` (if present), then environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("strategy.blacklist")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        let s = &self.strategy;

        if t.price_depth == 0 {
            return Err(EngineError::Config("trading.price_depth must be >= 1".into()));
        }
        if t.book_limit < t.price_depth {
            return Err(EngineError::Config(format!(
                "trading.book_limit ({}) must cover price_depth ({})",
                t.book_limit, t.price_depth
            )));
        }
        if t.amount <= 0.0 {
            return Err(EngineError::Config("trading.amount must be positive".into()));
        }
        if t.margin_utilization_rate <= 0.0 {
            return Err(EngineError::Config(
                "trading.margin_utilization_rate must be positive".into(),
            ));
        }
        if s.max_coins == 0 {
            return Err(EngineError::Config("strategy.max_coins must be >= 1".into()));
        }
        if s.rsi_length == 0 {
            return Err(EngineError::Config("strategy.rsi_length must be >= 1".into()));
        }
        // One bar is dropped as still forming
        if s.kline_limit <= s.rsi_length + 1 {
            return Err(EngineError::Config(format!(
                "strategy.kline_limit ({}) must exceed rsi_length + 1 ({})",
                s.kline_limit,
                s.rsi_length + 1
            )));
        }
        if self.engine.cycle_interval_secs == 0 {
            return Err(EngineError::Config(
                "engine.cycle_interval_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    pub fn is_blacklisted(&self, base_asset: &str) -> bool {
        self.strategy
            .blacklist
            .iter()
            .any(|b| b.eq_ignore_ascii_case(base_asset))
    }
}
