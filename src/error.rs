//! Error taxonomy for the trading engine.
//!
//! Each variant maps to one recovery policy: skip a step, abort the cycle,
//! skip a single order, or terminate the process at boot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Network failure or unexpected HTTP status. The affected step is skipped
    /// and picked up again on the next cycle.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// Not enough feed or market data to rank / price this cycle.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Malformed payload from the flow feed or the exchange.
    #[error("parse error: {0}")]
    Parse(String),

    /// Margin utilization above the configured cap. Nothing is opened this cycle.
    #[error("margin exceeded: used {used:.4} of wallet {wallet:.4} (cap {cap:.2})")]
    MarginExceeded { used: f64, wallet: f64, cap: f64 },

    /// The exchange refused a single order or cancellation.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Boot-time connectivity or metadata check failed.
    #[error("startup check failed: {0}")]
    FatalStartup(String),

    /// Indicator input shorter than the requested period.
    #[error("no data: need {needed} values, got {got}")]
    NoData { needed: usize, got: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for errors that abort the whole cycle rather than a single step.
    pub fn aborts_cycle(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData(_)
                | EngineError::Parse(_)
                | EngineError::MarginExceeded { .. }
                | EngineError::TransientNetwork(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::Parse(err.to_string())
        } else {
            EngineError::TransientNetwork(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<rust_decimal::Error> for EngineError {
    fn from(err: rust_decimal::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
