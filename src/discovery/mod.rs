// Instrument universe discovery
pub mod universe;

pub use universe::{build_universe, is_tradeable, Universe};
