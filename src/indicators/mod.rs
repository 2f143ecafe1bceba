// Technical indicators module
// Implements RSI, RMA and the lag-filtered CRSI used by the signal filter

pub mod moving_average;
pub mod rsi;

pub use moving_average::calculate_rma;
pub use rsi::{calculate_crsi, calculate_rsi, momentum_filter};
