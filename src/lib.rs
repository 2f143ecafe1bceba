// Core modules
pub mod api;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeClient, FlowFeed};
pub use engine::{CycleOutcome, TradingEngine};
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
