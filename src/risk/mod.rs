// Risk management module
pub mod margin_guard;

pub use margin_guard::{MarginGuard, MarginTrip};
