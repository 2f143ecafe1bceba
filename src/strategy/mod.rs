// Candidate selection: flow ranking, then indicator filtering
pub mod ranker;
pub mod signals;

pub use ranker::FlowRanker;
pub use signals::{SignalConfig, SignalFilter};
